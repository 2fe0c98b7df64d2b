// Tests for the Notion client against a mock server

use std::time::{Duration, Instant};

use calsync_core::{ClientError, DocumentProvider, PageDraft, TimeWindow};
use calsync_engine::{RetryPolicy, DOCUMENT_THROTTLE};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::{NotionClient, NOTION_VERSION};

fn test_client(server: &MockServer) -> NotionClient {
    NotionClient::new("secret_token")
        .with_api_base(server.uri())
        .with_retry_policy(RetryPolicy::fixed().with_delay(Duration::from_millis(10)))
}

fn page_json(id: &str, archived: bool) -> Value {
    json!({
        "object": "page",
        "id": id,
        "archived": archived,
        "last_edited_time": "2024-04-30T12:00:00.000Z",
        "properties": {
            "Name": { "title": [{ "plain_text": "Review" }] },
            "Date": { "date": { "start": "2024-05-01T09:00:00.000Z", "end": null } },
            "Calendar": { "select": { "name": "Work" } },
            "Description": { "rich_text": [] }
        }
    })
}

fn database_json(options: &[&str]) -> Value {
    let options: Vec<Value> = options.iter().map(|o| json!({ "name": o })).collect();
    json!({
        "object": "database",
        "id": "db-1",
        "title": [{ "plain_text": "Calendar" }],
        "properties": {
            "Calendar": { "type": "select", "select": { "options": options } }
        }
    })
}

#[test]
fn test_throttle_cannot_be_lowered() {
    let client = NotionClient::new("t").with_retry_policy(RetryPolicy::no_retry());
    assert_eq!(client.retry_policy().throttle, Some(DOCUMENT_THROTTLE));

    let slower = NotionClient::new("t")
        .with_retry_policy(RetryPolicy::fixed().with_throttle(Duration::from_secs(1)));
    assert_eq!(slower.retry_policy().throttle, Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_calls_are_throttled_and_versioned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pages/page-1"))
        .and(header("Authorization", "Bearer secret_token"))
        .and(header("Notion-Version", NOTION_VERSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json("page-1", false)))
        .expect(1)
        .mount(&server)
        .await;

    let started = Instant::now();
    let page = test_client(&server).get_page("page-1").await.unwrap();
    assert!(started.elapsed() >= DOCUMENT_THROTTLE);
    assert_eq!(page.title, "Review");
    assert_eq!(page.calendar_property.as_deref(), Some("Work"));
}

#[tokio::test]
async fn test_missing_database_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/databases/db-404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "object": "error", "status": 404, "code": "object_not_found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let db = test_client(&server).get_database("db-404").await.unwrap();
    assert!(db.is_none());
}

#[tokio::test]
async fn test_database_failure_propagates_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/databases/db-1"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let err = test_client(&server).get_database("db-1").await.unwrap_err();
    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn test_add_property_appends_option() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/databases/db-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(database_json(&["Work"])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/databases/db-1"))
        .and(body_partial_json(json!({
            "properties": { "Calendar": { "select": { "options": [
                { "name": "Work" }, { "name": "Home" }
            ]}}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(database_json(&["Work", "Home"])))
        .expect(1)
        .mount(&server)
        .await;

    let info = test_client(&server).add_property("db-1", "Home").await.unwrap();
    assert!(info.has_binding("Home"));
    assert!(info.has_binding("Work"));
}

#[tokio::test]
async fn test_add_existing_property_does_not_patch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/databases/db-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(database_json(&["Work"])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/databases/db-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let info = test_client(&server).add_property("db-1", "Work").await.unwrap();
    assert_eq!(info.calendar_options, vec!["Work"]);
}

#[tokio::test]
async fn test_query_pages_follows_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/databases/db-1/query"))
        .and(body_partial_json(json!({ "start_cursor": "c2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [page_json("page-3", true)],
            "has_more": false,
            "next_cursor": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/databases/db-1/query"))
        .and(body_partial_json(json!({ "page_size": 100 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [page_json("page-1", false), page_json("page-2", false)],
            "has_more": true,
            "next_cursor": "c2"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let window = TimeWindow::new(
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    );
    let pages = test_client(&server).query_pages("db-1", window).await.unwrap();

    let ids: Vec<_> = pages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["page-1", "page-2", "page-3"]);
    assert!(pages[2].archived);
}

#[tokio::test]
async fn test_create_page_targets_database() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pages"))
        .and(body_partial_json(json!({
            "parent": { "database_id": "db-1" },
            "properties": { "Calendar": { "select": { "name": "Work" } } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json("page-9", false)))
        .expect(1)
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let draft = PageDraft {
        title: "Review".into(),
        calendar_property: "Work".into(),
        description: None,
        start,
        end: start + chrono::Duration::minutes(30),
        all_day: false,
    };
    let page = test_client(&server).create_page("db-1", &draft).await.unwrap();
    assert_eq!(page.id, "page-9");
}

#[tokio::test]
async fn test_archive_missing_page_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/pages/gone"))
        .and(body_partial_json(json!({ "archived": true })))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = test_client(&server).archive_page("gone").await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 404, .. }));
    assert!(err.is_not_found());
}
