// Notion REST client

use async_trait::async_trait;
use calsync_core::{
    ClientError, ClientResult, DatabaseInfo, DocumentPage, DocumentProvider, PageDraft, TimeWindow,
};
use calsync_engine::{retry_if, RetryPolicy, DOCUMENT_THROTTLE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::schema::NotionSchema;

pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";

const PAGE_SIZE: u32 = 100;

/// Document provider for one tenant's Notion workspace
///
/// Every attempt waits at least [`DOCUMENT_THROTTLE`] before it is sent.
pub struct NotionClient {
    http: Client,
    api_base: String,
    token: String,
    schema: NotionSchema,
    policy: RetryPolicy,
}

impl std::fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionClient")
            .field("api_base", &self.api_base)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Raise the policy's throttle to the provider minimum.
fn throttled(policy: RetryPolicy) -> RetryPolicy {
    let throttle = policy.throttle.unwrap_or_default().max(DOCUMENT_THROTTLE);
    policy.with_throttle(throttle)
}

async fn check(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

impl NotionClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: NOTION_API_BASE.to_string(),
            token: token.into(),
            schema: NotionSchema::default(),
            policy: throttled(RetryPolicy::fixed()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_schema(mut self, schema: NotionSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Replace the retry policy. The throttle never drops below the minimum.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = throttled(policy);
        self
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn request<B>(&self, build: B) -> ClientResult<Value>
    where
        B: Fn(&Client) -> RequestBuilder,
    {
        retry_if(
            &self.policy,
            || async {
                let response = self
                    .authorized(build(&self.http))
                    .send()
                    .await
                    .map_err(|e| ClientError::Transport(e.to_string()))?;
                check(response)
                    .await?
                    .json::<Value>()
                    .await
                    .map_err(|e| ClientError::Decode(e.to_string()))
            },
            ClientError::is_retryable,
        )
        .await
    }

    async fn fetch_database(&self, database_id: &str) -> ClientResult<Value> {
        let url = self.url(&format!("databases/{database_id}"));
        self.request(|http| http.get(&url)).await
    }
}

#[async_trait]
impl DocumentProvider for NotionClient {
    #[instrument(skip(self))]
    async fn get_page(&self, page_id: &str) -> ClientResult<DocumentPage> {
        let url = self.url(&format!("pages/{page_id}"));
        let page = self.request(|http| http.get(&url)).await?;
        self.schema.parse_page(&page)
    }

    #[instrument(skip(self))]
    async fn get_database(&self, database_id: &str) -> ClientResult<Option<DatabaseInfo>> {
        match self.fetch_database(database_id).await {
            Ok(db) => self.schema.parse_database(&db).map(Some),
            Err(e) if e.is_not_found() => {
                debug!("Database not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn add_property(&self, database_id: &str, binding: &str) -> ClientResult<DatabaseInfo> {
        let current = self.fetch_database(database_id).await?;
        let info = self.schema.parse_database(&current)?;
        if info.has_binding(binding) {
            return Ok(info);
        }

        let body = self.schema.options_with(&current, binding);
        let url = self.url(&format!("databases/{database_id}"));
        let updated = self.request(|http| http.patch(&url).json(&body)).await?;
        self.schema.parse_database(&updated)
    }

    #[instrument(skip(self, window))]
    async fn query_pages(&self, database_id: &str, window: TimeWindow) -> ClientResult<Vec<DocumentPage>> {
        let url = self.url(&format!("databases/{database_id}/query"));
        let filter = self.schema.window_filter(window.min, window.max);
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "filter": filter, "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let result = self.request(|http| http.post(&url).json(&body)).await?;

            if let Some(results) = result.get("results").and_then(Value::as_array) {
                for page in results {
                    pages.push(self.schema.parse_page(page)?);
                }
            }

            let has_more = result.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            match result.get("next_cursor").and_then(Value::as_str) {
                Some(next) if has_more => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(count = pages.len(), "Queried pages");
        Ok(pages)
    }

    #[instrument(skip(self, draft))]
    async fn create_page(&self, database_id: &str, draft: &PageDraft) -> ClientResult<DocumentPage> {
        let url = self.url("pages");
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": self.schema.page_properties(draft),
        });
        let page = self.request(|http| http.post(&url).json(&body)).await?;
        self.schema.parse_page(&page)
    }

    #[instrument(skip(self, draft))]
    async fn update_page(&self, page_id: &str, draft: &PageDraft) -> ClientResult<DocumentPage> {
        let url = self.url(&format!("pages/{page_id}"));
        let body = json!({ "properties": self.schema.page_properties(draft) });
        let page = self.request(|http| http.patch(&url).json(&body)).await?;
        self.schema.parse_page(&page)
    }

    #[instrument(skip(self))]
    async fn archive_page(&self, page_id: &str) -> ClientResult<()> {
        let url = self.url(&format!("pages/{page_id}"));
        let body = json!({ "archived": true });
        self.request(|http| http.patch(&url).json(&body)).await?;
        Ok(())
    }
}
