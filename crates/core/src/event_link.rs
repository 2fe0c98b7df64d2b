// EventLink domain types
//
// An EventLink pairs a calendar-side event with its document-side page.
// At least one side is always present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted pairing of a calendar event and a document page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventLink {
    pub id: Uuid,
    pub calendar_event_id: Option<String>,
    pub page_id: Option<String>,
    pub calendar_id: Uuid,
    pub tenant_id: Uuid,
    pub will_remove: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventLink {
    /// Both sides present.
    pub fn is_synced(&self) -> bool {
        self.calendar_event_id.is_some() && self.page_id.is_some()
    }
}

/// Fields for inserting a new link.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEventLink {
    pub calendar_event_id: Option<String>,
    pub page_id: Option<String>,
    pub calendar_id: Uuid,
    pub tenant_id: Uuid,
}

impl NewEventLink {
    /// `None` when neither side is set.
    pub fn into_link(self) -> Option<EventLink> {
        if self.calendar_event_id.is_none() && self.page_id.is_none() {
            return None;
        }
        let now = Utc::now();
        Some(EventLink {
            id: Uuid::now_v7(),
            calendar_event_id: self.calendar_event_id,
            page_id: self.page_id,
            calendar_id: self.calendar_id,
            tenant_id: self.tenant_id,
            will_remove: false,
            created_at: now,
            updated_at: now,
        })
    }
}
