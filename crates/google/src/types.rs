// Google Calendar v3 wire types
//
// Only the fields the sync reads or writes. Conversions into the
// provider-neutral types of calsync-core live next to each type.

use calsync_core::{AccessRole, CalendarEvent, CalendarInfo, EventDraft};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Start or end of an event: a date for all-day events, an instant otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
}

impl EventDateTime {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        self.date_time.or_else(|| {
            self.date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
    }

    pub fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }

    fn at(at: DateTime<Utc>) -> Self {
        Self {
            date: None,
            date_time: Some(at),
        }
    }

    fn on(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            date_time: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListEntry {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub access_role: AccessRole,
    #[serde(default)]
    pub primary: bool,
}

impl From<CalendarListEntry> for CalendarInfo {
    fn from(entry: CalendarListEntry) -> Self {
        CalendarInfo {
            summary: entry.summary.unwrap_or_else(|| entry.id.clone()),
            id: entry.id,
            access_role: entry.access_role,
            primary: entry.primary,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CalendarListPage {
    #[serde(default)]
    pub items: Vec<CalendarListEntry>,
    pub next_page_token: Option<String>,
}

/// An event as returned by the events endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    // Cancelled instances may omit start/end
    #[serde(default)]
    pub start: EventDateTime,
    #[serde(default)]
    pub end: EventDateTime,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl GoogleEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    pub fn into_event(self, calendar_id: &str) -> CalendarEvent {
        let updated = self.updated.unwrap_or_else(Utc::now);
        let start = self.start.instant().unwrap_or(updated);
        let end = self.end.instant().unwrap_or(start);
        CalendarEvent {
            cancelled: self.is_cancelled(),
            all_day: self.start.is_all_day(),
            id: self.id,
            calendar_id: calendar_id.to_string(),
            summary: self.summary.unwrap_or_default(),
            description: self.description,
            start,
            end,
            updated,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventsPage {
    #[serde(default)]
    pub items: Vec<GoogleEvent>,
    pub next_page_token: Option<String>,
}

/// Body of an insert or patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
}

impl From<&EventDraft> for EventBody {
    fn from(draft: &EventDraft) -> Self {
        let (start, end) = if draft.all_day {
            // All-day end dates are exclusive
            let first = draft.start.date_naive();
            let last = draft.end.date_naive();
            let end = if last > first {
                last
            } else {
                first.succ_opt().unwrap_or(first)
            };
            (EventDateTime::on(first), EventDateTime::on(end))
        } else {
            (EventDateTime::at(draft.start), EventDateTime::at(draft.end))
        };
        Self {
            summary: draft.summary.clone(),
            description: draft.description.clone(),
            start,
            end,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_day_event_parses_to_midnight() {
        let event: GoogleEvent = serde_json::from_value(json!({
            "id": "e1",
            "status": "confirmed",
            "summary": "Holiday",
            "start": {"date": "2024-05-01"},
            "end": {"date": "2024-05-02"},
            "updated": "2024-04-01T08:00:00.000Z"
        }))
        .unwrap();

        let event = event.into_event("primary");
        assert!(event.all_day);
        assert!(!event.cancelled);
        assert_eq!(event.start.to_rfc3339(), "2024-05-01T00:00:00+00:00");
        assert_eq!(event.calendar_id, "primary");
    }

    #[test]
    fn test_offset_times_convert_to_utc() {
        let event: GoogleEvent = serde_json::from_value(json!({
            "id": "e2",
            "start": {"dateTime": "2024-05-01T10:00:00+02:00"},
            "end": {"dateTime": "2024-05-01T11:00:00+02:00"}
        }))
        .unwrap();
        let event = event.into_event("primary");
        assert_eq!(event.start.to_rfc3339(), "2024-05-01T08:00:00+00:00");
        assert_eq!(event.summary, "");
    }

    #[test]
    fn test_cancelled_instance_without_times() {
        let event: GoogleEvent = serde_json::from_value(json!({
            "id": "e3",
            "status": "cancelled",
            "updated": "2024-04-01T08:00:00Z"
        }))
        .unwrap();
        let event = event.into_event("primary");
        assert!(event.cancelled);
        assert_eq!(event.start, event.updated);
    }

    #[test]
    fn test_all_day_body_has_exclusive_end() {
        let start = "2024-05-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let body = EventBody::from(&EventDraft {
            summary: "Off".into(),
            description: None,
            start,
            end: start,
            all_day: true,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["start"], json!({"date": "2024-05-01"}));
        assert_eq!(json["end"], json!({"date": "2024-05-02"}));
        assert!(json.get("description").is_none());
    }
}
