// In-memory provider fakes
//
// Stand-ins for the calendar and document providers, used by unit and
// integration tests. They keep state in process memory and support scripted
// failures:
// - `fail_next` queues an error returned by the next call of any operation
// - `fail_on` returns an error from a named operation until cleared
// - `stall_on` makes a named operation sleep before answering
//
// Clock: every write stamps `Utc::now()`, matching what real providers report.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{
    AccessRole, CalendarEvent, CalendarInfo, CalendarProvider, ClientError, ClientResult,
    DatabaseInfo, DocumentPage, DocumentProvider, EventDraft, PageDraft, ProviderFactory,
    SyncError, Tenant, TimeWindow,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

fn not_found(what: &str) -> ClientError {
    ClientError::Status {
        status: 404,
        body: format!("{what} not found"),
    }
}

/// Scripted failures shared by both fakes.
#[derive(Default)]
struct Faults {
    queued: Mutex<VecDeque<ClientError>>,
    by_op: RwLock<HashMap<&'static str, ClientError>>,
    stalls: RwLock<HashMap<&'static str, Duration>>,
}

impl Faults {
    async fn check(&self, op: &'static str) -> ClientResult<()> {
        let stall = self.stalls.read().get(op).copied();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        if let Some(err) = self.queued.lock().pop_front() {
            return Err(err);
        }
        match self.by_op.read().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Calendar
// ============================================================================

/// Calendar provider backed by process memory.
#[derive(Default)]
pub struct FakeCalendar {
    calendars: RwLock<HashMap<String, CalendarInfo>>,
    events: RwLock<HashMap<(String, String), CalendarEvent>>,
    next_id: AtomicU64,
    calls: AtomicU64,
    faults: Faults,
}

impl FakeCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a calendar the caller can access with `role`.
    pub fn add_calendar(&self, id: &str, role: AccessRole) {
        self.calendars.write().insert(
            id.to_string(),
            CalendarInfo {
                id: id.to_string(),
                summary: id.to_string(),
                access_role: role,
                primary: false,
            },
        );
    }

    pub fn remove_calendar(&self, id: &str) {
        self.calendars.write().remove(id);
    }

    /// Seed an event as if the user created it upstream.
    pub fn seed_event(&self, calendar_id: &str, draft: &EventDraft) -> CalendarEvent {
        let event = self.build_event(calendar_id, draft);
        self.events
            .write()
            .insert((calendar_id.to_string(), event.id.clone()), event.clone());
        event
    }

    /// Mark an upstream event cancelled.
    pub fn cancel_event(&self, calendar_id: &str, event_id: &str) {
        if let Some(event) = self
            .events
            .write()
            .get_mut(&(calendar_id.to_string(), event_id.to_string()))
        {
            event.cancelled = true;
            event.updated = Utc::now();
        }
    }

    pub fn events(&self, calendar_id: &str) -> Vec<CalendarEvent> {
        let mut events: Vec<CalendarEvent> = self
            .events
            .read()
            .values()
            .filter(|e| e.calendar_id == calendar_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Upstream calls served so far, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn fail_next(&self, err: ClientError) {
        self.faults.queued.lock().push_back(err);
    }

    pub fn fail_on(&self, op: &'static str, err: ClientError) {
        self.faults.by_op.write().insert(op, err);
    }

    pub fn clear_failures(&self) {
        self.faults.queued.lock().clear();
        self.faults.by_op.write().clear();
        self.faults.stalls.write().clear();
    }

    pub fn stall_on(&self, op: &'static str, stall: Duration) {
        self.faults.stalls.write().insert(op, stall);
    }

    async fn enter(&self, op: &'static str) -> ClientResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.faults.check(op).await
    }

    fn build_event(&self, calendar_id: &str, draft: &EventDraft) -> CalendarEvent {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        CalendarEvent {
            id: format!("evt-{n}"),
            calendar_id: calendar_id.to_string(),
            summary: draft.summary.clone(),
            description: draft.description.clone(),
            start: draft.start,
            end: draft.end,
            all_day: draft.all_day,
            cancelled: false,
            updated: Utc::now(),
        }
    }
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn get_event(&self, calendar_id: &str, event_id: &str) -> ClientResult<CalendarEvent> {
        self.enter("get_event").await?;
        self.events
            .read()
            .get(&(calendar_id.to_string(), event_id.to_string()))
            .cloned()
            .ok_or_else(|| not_found("event"))
    }

    async fn list_calendars(&self) -> ClientResult<Vec<CalendarInfo>> {
        self.enter("list_calendars").await?;
        let mut calendars: Vec<CalendarInfo> = self.calendars.read().values().cloned().collect();
        calendars.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(calendars)
    }

    async fn get_calendar(&self, calendar_id: &str) -> ClientResult<CalendarInfo> {
        self.enter("get_calendar").await?;
        self.calendars
            .read()
            .get(calendar_id)
            .cloned()
            .ok_or_else(|| not_found("calendar"))
    }

    async fn list_events(&self, calendar_id: &str, window: TimeWindow) -> ClientResult<Vec<CalendarEvent>> {
        self.enter("list_events").await?;
        if !self.calendars.read().contains_key(calendar_id) {
            return Err(not_found("calendar"));
        }
        Ok(self
            .events(calendar_id)
            .into_iter()
            .filter(|e| window.contains(e.start))
            .collect())
    }

    async fn insert_event(&self, calendar_id: &str, draft: &EventDraft) -> ClientResult<CalendarEvent> {
        self.enter("insert_event").await?;
        if !self.calendars.read().contains_key(calendar_id) {
            return Err(not_found("calendar"));
        }
        Ok(self.seed_event(calendar_id, draft))
    }

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        draft: &EventDraft,
    ) -> ClientResult<CalendarEvent> {
        self.enter("patch_event").await?;
        let mut events = self.events.write();
        let event = events
            .get_mut(&(calendar_id.to_string(), event_id.to_string()))
            .ok_or_else(|| not_found("event"))?;
        event.summary = draft.summary.clone();
        event.description = draft.description.clone();
        event.start = draft.start;
        event.end = draft.end;
        event.all_day = draft.all_day;
        event.updated = Utc::now();
        Ok(event.clone())
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> ClientResult<()> {
        self.enter("delete_event").await?;
        self.events
            .write()
            .remove(&(calendar_id.to_string(), event_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found("event"))
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Document provider backed by process memory. Holds at most one database.
#[derive(Default)]
pub struct FakeDocuments {
    database: RwLock<Option<DatabaseInfo>>,
    pages: RwLock<HashMap<String, DocumentPage>>,
    next_id: AtomicU64,
    calls: AtomicU64,
    faults: Faults,
}

impl FakeDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the database with the given calendar options.
    pub fn with_database(id: &str, options: &[&str]) -> Self {
        let docs = Self::default();
        *docs.database.write() = Some(DatabaseInfo {
            id: id.to_string(),
            title: id.to_string(),
            calendar_options: options.iter().map(|o| o.to_string()).collect(),
        });
        docs
    }

    pub fn database(&self) -> Option<DatabaseInfo> {
        self.database.read().clone()
    }

    /// Seed a page as if the user created it upstream.
    pub fn seed_page(&self, draft: &PageDraft) -> DocumentPage {
        let page = self.build_page(draft);
        self.pages.write().insert(page.id.clone(), page.clone());
        page
    }

    /// Edit a page upstream.
    pub fn edit_page(&self, page_id: &str, edit: impl FnOnce(&mut DocumentPage)) {
        if let Some(page) = self.pages.write().get_mut(page_id) {
            edit(page);
            page.last_edited = Utc::now();
        }
    }

    /// Delete a page upstream; later reads answer 404.
    pub fn remove_page(&self, page_id: &str) {
        self.pages.write().remove(page_id);
    }

    pub fn page(&self, page_id: &str) -> Option<DocumentPage> {
        self.pages.read().get(page_id).cloned()
    }

    pub fn pages(&self) -> Vec<DocumentPage> {
        let mut pages: Vec<DocumentPage> = self.pages.read().values().cloned().collect();
        pages.sort_by(|a, b| a.id.cmp(&b.id));
        pages
    }

    /// Pages not archived.
    pub fn live_page_count(&self) -> usize {
        self.pages.read().values().filter(|p| !p.archived).count()
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn fail_next(&self, err: ClientError) {
        self.faults.queued.lock().push_back(err);
    }

    pub fn fail_on(&self, op: &'static str, err: ClientError) {
        self.faults.by_op.write().insert(op, err);
    }

    pub fn clear_failures(&self) {
        self.faults.queued.lock().clear();
        self.faults.by_op.write().clear();
        self.faults.stalls.write().clear();
    }

    pub fn stall_on(&self, op: &'static str, stall: Duration) {
        self.faults.stalls.write().insert(op, stall);
    }

    async fn enter(&self, op: &'static str) -> ClientResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.faults.check(op).await
    }

    fn build_page(&self, draft: &PageDraft) -> DocumentPage {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        DocumentPage {
            id: format!("page-{n}"),
            title: draft.title.clone(),
            calendar_property: Some(draft.calendar_property.clone()),
            description: draft.description.clone(),
            start: Some(draft.start),
            end: Some(draft.end),
            all_day: draft.all_day,
            archived: false,
            last_edited: Utc::now(),
        }
    }

    fn check_database(&self, database_id: &str) -> ClientResult<()> {
        match &*self.database.read() {
            Some(db) if db.id == database_id => Ok(()),
            _ => Err(not_found("database")),
        }
    }
}

#[async_trait]
impl DocumentProvider for FakeDocuments {
    async fn get_page(&self, page_id: &str) -> ClientResult<DocumentPage> {
        self.enter("get_page").await?;
        self.page(page_id).ok_or_else(|| not_found("page"))
    }

    async fn get_database(&self, database_id: &str) -> ClientResult<Option<DatabaseInfo>> {
        self.enter("get_database").await?;
        Ok(self
            .database
            .read()
            .as_ref()
            .filter(|db| db.id == database_id)
            .cloned())
    }

    async fn add_property(&self, database_id: &str, binding: &str) -> ClientResult<DatabaseInfo> {
        self.enter("add_property").await?;
        let mut guard = self.database.write();
        let db = guard
            .as_mut()
            .filter(|db| db.id == database_id)
            .ok_or_else(|| not_found("database"))?;
        if !db.has_binding(binding) {
            db.calendar_options.push(binding.to_string());
        }
        Ok(db.clone())
    }

    async fn query_pages(&self, database_id: &str, window: TimeWindow) -> ClientResult<Vec<DocumentPage>> {
        self.enter("query_pages").await?;
        self.check_database(database_id)?;
        Ok(self
            .pages()
            .into_iter()
            .filter(|p| !p.archived)
            .filter(|p| p.start.map_or(true, |start| window.contains(start)))
            .collect())
    }

    async fn create_page(&self, database_id: &str, draft: &PageDraft) -> ClientResult<DocumentPage> {
        self.enter("create_page").await?;
        self.check_database(database_id)?;
        Ok(self.seed_page(draft))
    }

    async fn update_page(&self, page_id: &str, draft: &PageDraft) -> ClientResult<DocumentPage> {
        self.enter("update_page").await?;
        let mut pages = self.pages.write();
        let page = pages.get_mut(page_id).ok_or_else(|| not_found("page"))?;
        page.title = draft.title.clone();
        page.calendar_property = Some(draft.calendar_property.clone());
        page.description = draft.description.clone();
        page.start = Some(draft.start);
        page.end = Some(draft.end);
        page.all_day = draft.all_day;
        page.last_edited = Utc::now();
        Ok(page.clone())
    }

    async fn archive_page(&self, page_id: &str) -> ClientResult<()> {
        self.enter("archive_page").await?;
        let mut pages = self.pages.write();
        let page = pages.get_mut(page_id).ok_or_else(|| not_found("page"))?;
        page.archived = true;
        page.last_edited = Utc::now();
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Hands the same pair of fakes to every tenant.
#[derive(Clone)]
pub struct FakeProviders {
    pub calendar: Arc<FakeCalendar>,
    pub documents: Arc<FakeDocuments>,
}

impl FakeProviders {
    pub fn new(calendar: FakeCalendar, documents: FakeDocuments) -> Self {
        Self {
            calendar: Arc::new(calendar),
            documents: Arc::new(documents),
        }
    }
}

impl ProviderFactory for FakeProviders {
    fn calendar_for(&self, _tenant: &Tenant) -> Result<Arc<dyn CalendarProvider>, SyncError> {
        Ok(self.calendar.clone())
    }

    fn documents_for(&self, _tenant: &Tenant) -> Result<Arc<dyn DocumentProvider>, SyncError> {
        Ok(self.documents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft() -> EventDraft {
        let start = Utc::now();
        EventDraft {
            summary: "Standup".into(),
            description: None,
            start,
            end: start + Duration::minutes(15),
            all_day: false,
        }
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let calendar = FakeCalendar::new();
        calendar.add_calendar("primary", AccessRole::Owner);
        calendar.fail_next(ClientError::Status {
            status: 503,
            body: String::new(),
        });

        assert!(calendar.get_calendar("primary").await.is_err());
        assert!(calendar.get_calendar("primary").await.is_ok());
        assert_eq!(calendar.call_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_event_is_not_found() {
        let calendar = FakeCalendar::new();
        calendar.add_calendar("primary", AccessRole::Owner);
        let event = calendar.insert_event("primary", &draft()).await.unwrap();

        calendar.delete_event("primary", &event.id).await.unwrap();
        let err = calendar.delete_event("primary", &event.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_database_is_none() {
        let docs = FakeDocuments::with_database("db-1", &["Work"]);
        assert!(docs.get_database("db-2").await.unwrap().is_none());
        let db = docs.add_property("db-1", "Home").await.unwrap();
        assert!(db.has_binding("Home"));
    }
}
