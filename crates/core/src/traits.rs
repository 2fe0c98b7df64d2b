// Upstream provider traits
//
// The reconciler only talks to upstream systems through these traits. Concrete
// clients live in calsync-google and calsync-notion; tests use in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ClientError, SyncError};
use crate::tenant::Tenant;

/// Result of a single upstream call
pub type ClientResult<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Shared value types
// ============================================================================

/// Inclusive sync window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(min: DateTime<Utc>, max: DateTime<Utc>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.min && at <= self.max
    }
}

/// Caller's access role on a provider calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AccessRole {
    Owner,
    Writer,
    Reader,
    FreeBusyReader,
}

impl AccessRole {
    pub fn is_writeable(&self) -> bool {
        matches!(self, AccessRole::Owner | AccessRole::Writer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRole::Owner => "owner",
            AccessRole::Writer => "writer",
            AccessRole::Reader => "reader",
            AccessRole::FreeBusyReader => "freeBusyReader",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarInfo {
    pub id: String,
    pub summary: String,
    pub access_role: AccessRole,
    pub primary: bool,
}

/// An event as reported by the calendar provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub cancelled: bool,
    pub updated: DateTime<Utc>,
}

/// Event contents to write to the calendar provider.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
}

impl EventDraft {
    /// Event contents mirroring a document page. `None` when the page has no date.
    pub fn from_page(page: &DocumentPage) -> Option<Self> {
        let start = page.start?;
        Some(Self {
            summary: page.title.clone(),
            description: page.description.clone(),
            start,
            end: page.end.unwrap_or(start),
            all_day: page.all_day,
        })
    }
}

/// A page in the tenant's document database.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPage {
    pub id: String,
    pub title: String,
    /// Select-option routing the page to a calendar.
    pub calendar_property: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub archived: bool,
    pub last_edited: DateTime<Utc>,
}

/// Page contents to write to the document provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDraft {
    pub title: String,
    pub calendar_property: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
}

impl PageDraft {
    pub fn from_event(event: &CalendarEvent, calendar_property: &str) -> Self {
        Self {
            title: event.summary.clone(),
            calendar_property: calendar_property.to_string(),
            description: event.description.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
        }
    }
}

/// The bound document database.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseInfo {
    pub id: String,
    pub title: String,
    /// Options of the calendar select property.
    pub calendar_options: Vec<String>,
}

impl DatabaseInfo {
    pub fn has_binding(&self, binding: &str) -> bool {
        self.calendar_options.iter().any(|o| o == binding)
    }
}

// ============================================================================
// Provider traits
// ============================================================================

/// Calendar-side provider (Google Calendar)
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn get_event(&self, calendar_id: &str, event_id: &str) -> ClientResult<CalendarEvent>;

    async fn list_calendars(&self) -> ClientResult<Vec<CalendarInfo>>;

    /// Calendars the tenant can write to.
    async fn list_writeable_calendars(&self) -> ClientResult<Vec<CalendarInfo>> {
        let calendars = self.list_calendars().await?;
        Ok(calendars
            .into_iter()
            .filter(|c| c.access_role.is_writeable())
            .collect())
    }

    async fn get_calendar(&self, calendar_id: &str) -> ClientResult<CalendarInfo>;

    /// Events in the window, including cancelled ones.
    async fn list_events(&self, calendar_id: &str, window: TimeWindow) -> ClientResult<Vec<CalendarEvent>>;

    async fn insert_event(&self, calendar_id: &str, draft: &EventDraft) -> ClientResult<CalendarEvent>;

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        draft: &EventDraft,
    ) -> ClientResult<CalendarEvent>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> ClientResult<()>;
}

/// Document-side provider (Notion)
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn get_page(&self, page_id: &str) -> ClientResult<DocumentPage>;

    /// `Ok(None)` when the database does not exist.
    async fn get_database(&self, database_id: &str) -> ClientResult<Option<DatabaseInfo>>;

    /// Add `binding` as an option of the calendar select property.
    async fn add_property(&self, database_id: &str, binding: &str) -> ClientResult<DatabaseInfo>;

    /// Pages dated in the window, including archived ones.
    async fn query_pages(&self, database_id: &str, window: TimeWindow) -> ClientResult<Vec<DocumentPage>>;

    async fn create_page(&self, database_id: &str, draft: &PageDraft) -> ClientResult<DocumentPage>;

    async fn update_page(&self, page_id: &str, draft: &PageDraft) -> ClientResult<DocumentPage>;

    async fn archive_page(&self, page_id: &str) -> ClientResult<()>;
}

/// Builds per-tenant provider clients for a pass.
pub trait ProviderFactory: Send + Sync {
    fn calendar_for(&self, tenant: &Tenant) -> Result<Arc<dyn CalendarProvider>, SyncError>;

    fn documents_for(&self, tenant: &Tenant) -> Result<Arc<dyn DocumentProvider>, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event() -> CalendarEvent {
        let start = Utc::now();
        CalendarEvent {
            id: "evt-1".into(),
            calendar_id: "primary".into(),
            summary: "Standup".into(),
            description: Some("daily".into()),
            start,
            end: start + Duration::minutes(15),
            all_day: false,
            cancelled: false,
            updated: start,
        }
    }

    #[test]
    fn test_page_draft_from_event() {
        let evt = event();
        let draft = PageDraft::from_event(&evt, "Work");
        assert_eq!(draft.title, "Standup");
        assert_eq!(draft.calendar_property, "Work");
        assert_eq!(draft.end, evt.end);
    }

    #[test]
    fn test_event_draft_requires_date() {
        let mut page = DocumentPage {
            id: "p".into(),
            title: "Review".into(),
            calendar_property: None,
            description: None,
            start: None,
            end: None,
            all_day: true,
            archived: false,
            last_edited: Utc::now(),
        };
        assert!(EventDraft::from_page(&page).is_none());

        let start = Utc::now();
        page.start = Some(start);
        let draft = EventDraft::from_page(&page).unwrap();
        assert_eq!(draft.end, start);
        assert!(draft.all_day);
    }

    #[test]
    fn test_access_role_writeable() {
        assert!(AccessRole::Owner.is_writeable());
        assert!(AccessRole::Writer.is_writeable());
        assert!(!AccessRole::Reader.is_writeable());
        assert!(!AccessRole::FreeBusyReader.is_writeable());
    }

    #[test]
    fn test_database_has_binding() {
        let db = DatabaseInfo {
            id: "db".into(),
            title: "Calendar".into(),
            calendar_options: vec!["Work".into()],
        };
        assert!(db.has_binding("Work"));
        assert!(!db.has_binding("Home"));
    }

    #[test]
    fn test_time_window_contains() {
        let now = Utc::now();
        let window = TimeWindow::new(now - Duration::days(1), now + Duration::days(1));
        assert!(window.contains(now));
        assert!(!window.contains(now + Duration::days(2)));
    }
}
