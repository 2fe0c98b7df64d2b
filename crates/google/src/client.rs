// Google Calendar REST client

use async_trait::async_trait;
use calsync_core::{
    CalendarEvent, CalendarInfo, CalendarProvider, ClientError, ClientResult, EventDraft,
    TimeWindow,
};
use calsync_engine::{retry_if, RetryPolicy};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use url::Url;

use crate::types::{CalendarListPage, EventBody, EventsPage, GoogleEvent, TokenResponse};

pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const PAGE_SIZE: &str = "250";

/// OAuth material for one tenant.
#[derive(Clone)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Resolved from the tenant's callback version
    pub redirect_url: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCredentials")
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

/// Calendar provider for one tenant's Google account
///
/// Retries transient failures with the configured [`RetryPolicy`]. A 401
/// refreshes the access token once and replays the request.
pub struct GoogleCalendarClient {
    http: Client,
    api_base: String,
    token_url: String,
    credentials: GoogleCredentials,
    access_token: RwLock<String>,
    policy: RetryPolicy,
}

fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

fn decode(e: reqwest::Error) -> ClientError {
    ClientError::Decode(e.to_string())
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

impl GoogleCalendarClient {
    pub fn new(credentials: GoogleCredentials) -> Self {
        Self {
            http: Client::new(),
            api_base: GOOGLE_CALENDAR_API_BASE.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            access_token: RwLock::new(credentials.access_token.clone()),
            credentials,
            policy: RetryPolicy::fixed(),
        }
    }

    /// Point at a different API root (tests, proxies).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Token currently in use; changes after a refresh.
    pub fn access_token(&self) -> String {
        self.access_token.read().clone()
    }

    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ClientError::Configuration(format!("invalid API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Configuration("API base cannot have a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> ClientResult<String> {
        let refresh_token = self
            .credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| ClientError::Configuration("no refresh token".into()))?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("redirect_uri", self.credentials.redirect_url.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(transport)?;
        let token: TokenResponse = check(response).await?.json().await.map_err(decode)?;

        *self.access_token.write() = token.access_token.clone();
        info!(expires_in = ?token.expires_in, "Access token refreshed");
        Ok(token.access_token)
    }

    /// One attempt, with a single refresh-and-replay on 401.
    async fn send_once<B>(&self, build: &B) -> ClientResult<Response>
    where
        B: Fn(&Client, &str) -> RequestBuilder,
    {
        let token = self.access_token();
        let response = build(&self.http, &token).send().await.map_err(transport)?;

        if response.status() == StatusCode::UNAUTHORIZED && self.credentials.refresh_token.is_some() {
            debug!("Access token rejected");
            let token = self.refresh().await?;
            let response = build(&self.http, &token).send().await.map_err(transport)?;
            return check(response).await;
        }
        check(response).await
    }

    async fn request<T, B>(&self, build: B) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Fn(&Client, &str) -> RequestBuilder,
    {
        retry_if(
            &self.policy,
            || async {
                let response = self.send_once(&build).await?;
                response.json::<T>().await.map_err(decode)
            },
            ClientError::is_retryable,
        )
        .await
    }

    async fn request_empty<B>(&self, build: B) -> ClientResult<()>
    where
        B: Fn(&Client, &str) -> RequestBuilder,
    {
        retry_if(
            &self.policy,
            || async { self.send_once(&build).await.map(|_| ()) },
            ClientError::is_retryable,
        )
        .await
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    #[instrument(skip(self))]
    async fn get_event(&self, calendar_id: &str, event_id: &str) -> ClientResult<CalendarEvent> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        let event: GoogleEvent = self
            .request(|http, token| http.get(url.clone()).bearer_auth(token))
            .await?;
        Ok(event.into_event(calendar_id))
    }

    #[instrument(skip(self))]
    async fn list_calendars(&self) -> ClientResult<Vec<CalendarInfo>> {
        let url = self.url(&["users", "me", "calendarList"])?;
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("maxResults", PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: CalendarListPage = self
                .request(|http, token| http.get(url.clone()).bearer_auth(token).query(&query))
                .await?;

            calendars.extend(page.items.into_iter().map(CalendarInfo::from));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(count = calendars.len(), "Listed calendars");
        Ok(calendars)
    }

    #[instrument(skip(self))]
    async fn get_calendar(&self, calendar_id: &str) -> ClientResult<CalendarInfo> {
        let url = self.url(&["users", "me", "calendarList", calendar_id])?;
        let entry: crate::types::CalendarListEntry = self
            .request(|http, token| http.get(url.clone()).bearer_auth(token))
            .await?;
        Ok(entry.into())
    }

    #[instrument(skip(self, window))]
    async fn list_events(&self, calendar_id: &str, window: TimeWindow) -> ClientResult<Vec<CalendarEvent>> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", window.min.to_rfc3339()),
                ("timeMax", window.max.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("showDeleted", "true".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: EventsPage = self
                .request(|http, token| http.get(url.clone()).bearer_auth(token).query(&query))
                .await?;

            events.extend(page.items.into_iter().map(|e| e.into_event(calendar_id)));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(count = events.len(), "Listed events");
        Ok(events)
    }

    #[instrument(skip(self, draft))]
    async fn insert_event(&self, calendar_id: &str, draft: &EventDraft) -> ClientResult<CalendarEvent> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let body = EventBody::from(draft);
        let event: GoogleEvent = self
            .request(|http, token| http.post(url.clone()).bearer_auth(token).json(&body))
            .await?;
        Ok(event.into_event(calendar_id))
    }

    #[instrument(skip(self, draft))]
    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        draft: &EventDraft,
    ) -> ClientResult<CalendarEvent> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        let body = EventBody::from(draft);
        let event: GoogleEvent = self
            .request(|http, token| http.patch(url.clone()).bearer_auth(token).json(&body))
            .await?;
        Ok(event.into_event(calendar_id))
    }

    #[instrument(skip(self))]
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> ClientResult<()> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        self.request_empty(|http, token| http.delete(url.clone()).bearer_auth(token))
            .await
    }
}
