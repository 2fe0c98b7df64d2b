// Tests for the Google Calendar client against a mock server

use std::time::Duration;

use calsync_core::{AccessRole, CalendarProvider, ClientError, EventDraft, TimeWindow};
use calsync_engine::RetryPolicy;
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::{GoogleCalendarClient, GoogleCredentials};

fn credentials() -> GoogleCredentials {
    GoogleCredentials {
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        redirect_url: "https://app.example/callback".into(),
        access_token: "old-token".into(),
        refresh_token: Some("refresh-token".into()),
    }
}

fn test_client(server: &MockServer) -> GoogleCalendarClient {
    GoogleCalendarClient::new(credentials())
        .with_api_base(server.uri())
        .with_token_url(format!("{}/token", server.uri()))
        .with_retry_policy(RetryPolicy::fixed().with_delay(Duration::from_millis(10)))
}

fn event_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": "confirmed",
        "summary": "Standup",
        "start": {"dateTime": "2024-05-01T09:00:00Z"},
        "end": {"dateTime": "2024-05-01T09:15:00Z"},
        "updated": "2024-04-30T12:00:00Z"
    })
}

#[tokio::test]
async fn test_list_writeable_calendars_filters_roles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me/calendarList"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "me@example.com", "summary": "Me", "accessRole": "owner", "primary": true},
                {"id": "team", "accessRole": "writer"},
                {"id": "holidays", "summary": "Holidays", "accessRole": "reader"}
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = test_client(&server);
    assert_eq!(client.list_calendars().await.unwrap().len(), 3);

    let writeable = client.list_writeable_calendars().await.unwrap();
    let ids: Vec<_> = writeable.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["me@example.com", "team"]);
    assert!(writeable[0].primary);
    assert_eq!(writeable[1].summary, "team");
}

#[tokio::test]
async fn test_get_calendar_reports_role() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me/calendarList/team"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "team", "summary": "Team", "accessRole": "freeBusyReader"
        })))
        .mount(&server)
        .await;

    let info = test_client(&server).get_calendar("team").await.unwrap();
    assert_eq!(info.access_role, AccessRole::FreeBusyReader);
    assert!(!info.access_role.is_writeable());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events/e1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend error"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events/e1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(event_json("e1")))
        .expect(1)
        .mount(&server)
        .await;

    let event = test_client(&server).get_event("primary", "e1").await.unwrap();
    assert_eq!(event.id, "e1");
    assert_eq!(event.summary, "Standup");
}

#[tokio::test]
async fn test_retries_exhausted_returns_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events/e1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let err = test_client(&server).get_event("primary", "e1").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Status {
            status: 500,
            body: "boom".into()
        }
    );
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/calendars/primary/events/gone"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;

    let err = test_client(&server)
        .delete_event("primary", "gone")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events/e1"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token", "expires_in": 3599, "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events/e1"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(event_json("e1")))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    client.get_event("primary", "e1").await.unwrap();
    assert_eq!(client.access_token(), "new-token");
}

#[tokio::test]
async fn test_list_events_follows_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "e3", "status": "cancelled", "updated": "2024-04-30T12:00:00Z"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("singleEvents", "true"))
        .and(query_param("showDeleted", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [event_json("e1"), event_json("e2")],
            "nextPageToken": "p2"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let window = TimeWindow::new(
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    );
    let events = test_client(&server)
        .list_events("primary", window)
        .await
        .unwrap();

    let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2", "e3"]);
    assert!(events[2].cancelled);
}

#[tokio::test]
async fn test_insert_event_sends_times() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calendars/primary/events"))
        .and(body_string_contains("\"summary\":\"Review\""))
        .and(body_string_contains("\"dateTime\":\"2024-05-01T09:00:00Z\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(event_json("new-1")))
        .expect(1)
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let draft = EventDraft {
        summary: "Review".into(),
        description: None,
        start,
        end: start + chrono::Duration::minutes(15),
        all_day: false,
    };
    let event = test_client(&server).insert_event("primary", &draft).await.unwrap();
    assert_eq!(event.id, "new-1");
    assert_eq!(event.calendar_id, "primary");
}
