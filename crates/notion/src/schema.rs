// Database schema and page property mapping
//
// A tenant's database is expected to carry four properties: a title, a date,
// a calendar select and a description. Their names are configurable; reading
// goes through serde_json::Value because property objects are keyed by name.

use calsync_core::{ClientError, ClientResult, DatabaseInfo, DocumentPage, PageDraft};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Map, Value};

/// Names of the properties the sync reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionSchema {
    pub title: String,
    pub date: String,
    pub calendar: String,
    pub description: String,
}

impl Default for NotionSchema {
    fn default() -> Self {
        Self {
            title: "Name".to_string(),
            date: "Date".to_string(),
            calendar: "Calendar".to_string(),
            description: "Description".to_string(),
        }
    }
}

fn decode(msg: impl Into<String>) -> ClientError {
    ClientError::Decode(msg.into())
}

fn plain_text(rich: Option<&Value>) -> Option<String> {
    let parts = rich?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("plain_text").and_then(Value::as_str))
        .collect();
    Some(text)
}

/// A Notion date string: `YYYY-MM-DD` for all-day, RFC 3339 otherwise.
fn parse_date(raw: &str) -> ClientResult<(DateTime<Utc>, bool)> {
    if raw.len() == 10 {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| decode(format!("bad date {raw}: {e}")))?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| decode(format!("bad date {raw}")))?;
        return Ok((midnight.and_utc(), true));
    }
    let at = DateTime::parse_from_rfc3339(raw).map_err(|e| decode(format!("bad datetime {raw}: {e}")))?;
    Ok((at.with_timezone(&Utc), false))
}

impl NotionSchema {
    pub(crate) fn parse_page(&self, page: &Value) -> ClientResult<DocumentPage> {
        let id = page
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| decode("page without id"))?
            .to_string();
        let last_edited = page
            .get("last_edited_time")
            .and_then(Value::as_str)
            .ok_or_else(|| decode("page without last_edited_time"))
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| decode(e.to_string()))
            })?;
        let archived = page.get("archived").and_then(Value::as_bool).unwrap_or(false)
            || page.get("in_trash").and_then(Value::as_bool).unwrap_or(false);

        let empty = Map::new();
        let props = page
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let title = plain_text(props.get(&self.title).and_then(|p| p.get("title"))).unwrap_or_default();
        let description = plain_text(props.get(&self.description).and_then(|p| p.get("rich_text")))
            .filter(|d| !d.is_empty());
        let calendar_property = props
            .get(&self.calendar)
            .and_then(|p| p.get("select"))
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let date = props
            .get(&self.date)
            .and_then(|p| p.get("date"))
            .filter(|d| !d.is_null());
        let (start, end, all_day) = match date {
            None => (None, None, false),
            Some(date) => {
                let (start, all_day) = match date.get("start").and_then(Value::as_str) {
                    Some(raw) => parse_date(raw)?,
                    None => return Err(decode("date property without start")),
                };
                let end = match date.get("end").and_then(Value::as_str) {
                    // All-day ends are inclusive in Notion; keep them exclusive internally
                    Some(raw) => {
                        let (end, _) = parse_date(raw)?;
                        Some(if all_day { end + Duration::days(1) } else { end })
                    }
                    None => None,
                };
                (Some(start), end, all_day)
            }
        };

        Ok(DocumentPage {
            id,
            title,
            calendar_property,
            description,
            start,
            end,
            all_day,
            archived,
            last_edited,
        })
    }

    pub(crate) fn parse_database(&self, db: &Value) -> ClientResult<DatabaseInfo> {
        let id = db
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| decode("database without id"))?
            .to_string();
        let title = plain_text(db.get("title")).unwrap_or_default();
        let calendar_options = self
            .select_options(db)
            .iter()
            .filter_map(|o| o.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(DatabaseInfo {
            id,
            title,
            calendar_options,
        })
    }

    /// Raw option objects of the calendar select property.
    pub(crate) fn select_options<'a>(&self, db: &'a Value) -> &'a [Value] {
        db.get("properties")
            .and_then(|p| p.get(&self.calendar))
            .and_then(|p| p.get("select"))
            .and_then(|s| s.get("options"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Body for a database PATCH adding `binding` to the select options.
    pub(crate) fn options_with(&self, db: &Value, binding: &str) -> Value {
        let mut options: Vec<Value> = self
            .select_options(db)
            .iter()
            .filter_map(|o| o.get("name").cloned())
            .map(|name| json!({ "name": name }))
            .collect();
        options.push(json!({ "name": binding }));

        let mut properties = Map::new();
        properties.insert(
            self.calendar.clone(),
            json!({ "select": { "options": options } }),
        );
        json!({ "properties": properties })
    }

    pub(crate) fn page_properties(&self, draft: &PageDraft) -> Value {
        let date = if draft.all_day {
            let first = draft.start.date_naive();
            let last = (draft.end - Duration::days(1)).date_naive();
            if last > first {
                json!({ "start": first.to_string(), "end": last.to_string() })
            } else {
                json!({ "start": first.to_string() })
            }
        } else if draft.end > draft.start {
            json!({ "start": draft.start.to_rfc3339(), "end": draft.end.to_rfc3339() })
        } else {
            json!({ "start": draft.start.to_rfc3339() })
        };

        let description = draft.description.as_deref().unwrap_or_default();

        let mut properties = Map::new();
        properties.insert(
            self.title.clone(),
            json!({ "title": [{ "text": { "content": draft.title } }] }),
        );
        properties.insert(self.date.clone(), json!({ "date": date }));
        properties.insert(
            self.calendar.clone(),
            json!({ "select": { "name": draft.calendar_property } }),
        );
        properties.insert(
            self.description.clone(),
            json!({ "rich_text": [{ "text": { "content": description } }] }),
        );
        Value::Object(properties)
    }

    /// Query filter selecting pages whose date falls in `[min, max]`.
    pub(crate) fn window_filter(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> Value {
        json!({
            "and": [
                { "property": self.date, "date": { "on_or_after": min.to_rfc3339() } },
                { "property": self.date, "date": { "on_or_before": max.to_rfc3339() } }
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn page(date: Value) -> Value {
        json!({
            "object": "page",
            "id": "page-1",
            "archived": false,
            "last_edited_time": "2024-04-30T12:00:00.000Z",
            "properties": {
                "Name": { "type": "title", "title": [
                    { "plain_text": "Team " }, { "plain_text": "sync" }
                ]},
                "Date": { "type": "date", "date": date },
                "Calendar": { "type": "select", "select": { "name": "Work" } },
                "Description": { "type": "rich_text", "rich_text": [] }
            }
        })
    }

    #[test]
    fn test_parse_timed_page() {
        let parsed = NotionSchema::default()
            .parse_page(&page(json!({
                "start": "2024-05-01T09:00:00.000+02:00",
                "end": "2024-05-01T10:00:00.000+02:00"
            })))
            .unwrap();

        assert_eq!(parsed.title, "Team sync");
        assert_eq!(parsed.calendar_property.as_deref(), Some("Work"));
        assert_eq!(parsed.description, None);
        assert!(!parsed.all_day);
        assert_eq!(parsed.start, Some(Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()));
        assert_eq!(parsed.end, Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()));
    }

    #[test]
    fn test_all_day_end_becomes_exclusive() {
        let parsed = NotionSchema::default()
            .parse_page(&page(json!({ "start": "2024-05-01", "end": "2024-05-03" })))
            .unwrap();
        assert!(parsed.all_day);
        assert_eq!(parsed.end, Some(Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_undated_page() {
        let parsed = NotionSchema::default().parse_page(&page(Value::Null)).unwrap();
        assert_eq!(parsed.start, None);
        assert_eq!(parsed.end, None);
    }

    #[test]
    fn test_all_day_properties_round_trip_dates() {
        let schema = NotionSchema::default();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let draft = PageDraft {
            title: "Offsite".into(),
            calendar_property: "Work".into(),
            description: Some("bring laptop".into()),
            start,
            end: start + Duration::days(1),
            all_day: true,
        };

        let props = schema.page_properties(&draft);
        assert_eq!(props["Date"]["date"], json!({ "start": "2024-05-01" }));
        assert_eq!(props["Calendar"]["select"]["name"], "Work");
        assert_eq!(
            props["Description"]["rich_text"][0]["text"]["content"],
            "bring laptop"
        );
    }

    #[test]
    fn test_options_with_keeps_existing() {
        let schema = NotionSchema::default();
        let db = json!({
            "id": "db-1",
            "title": [{ "plain_text": "Calendar" }],
            "properties": {
                "Calendar": { "select": { "options": [
                    { "id": "a", "name": "Work", "color": "blue" }
                ]}}
            }
        });

        let info = schema.parse_database(&db).unwrap();
        assert_eq!(info.title, "Calendar");
        assert_eq!(info.calendar_options, vec!["Work"]);

        let body = schema.options_with(&db, "Home");
        assert_eq!(
            body["properties"]["Calendar"]["select"]["options"],
            json!([{ "name": "Work" }, { "name": "Home" }])
        );
    }
}
