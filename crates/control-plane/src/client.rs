// Authenticated client for one fleet instance's control surface
//
// Carries the instance's prefix and shared secret on every call, the same
// headers the instance checks before acting.

use std::time::Duration;

use calsync_core::{FleetInstance, PREFIX_HEADER, SECRET_HEADER};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};
use utoipa::ToSchema;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum InstanceClientError {
    /// The instance did not accept the stored secret
    #[error("instance rejected the control secret")]
    Rejected,

    #[error("instance returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("instance unreachable: {0}")]
    Unreachable(String),

    #[error("invalid response from instance: {0}")]
    Decode(String),
}

/// Liveness answer of an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceLiveness {
    pub status: String,
    pub prefix: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

pub struct InstanceClient {
    http: Client,
    base_url: String,
    prefix: String,
    secret: String,
}

impl InstanceClient {
    pub fn new(instance: &FleetInstance) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_http_client(instance, http)
    }

    pub fn with_http_client(instance: &FleetInstance, http: Client) -> Self {
        Self {
            http,
            base_url: instance.routing_url.trim_end_matches('/').to_string(),
            prefix: instance.identity_prefix.clone(),
            secret: instance.shared_secret.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(PREFIX_HEADER, &self.prefix)
            .header(SECRET_HEADER, &self.secret)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, InstanceClientError> {
        let response = builder
            .send()
            .await
            .map_err(|e| InstanceClientError::Unreachable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::FORBIDDEN => Err(InstanceClientError::Rejected),
            status => Err(InstanceClientError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn json(&self, builder: RequestBuilder) -> Result<Value, InstanceClientError> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| InstanceClientError::Decode(e.to_string()))
    }

    #[instrument(skip(self), fields(prefix = %self.prefix))]
    pub async fn liveness(&self) -> Result<InstanceLiveness, InstanceClientError> {
        let response = self.send(self.request(Method::GET, "/liveness")).await?;
        let liveness = response
            .json()
            .await
            .map_err(|e| InstanceClientError::Decode(e.to_string()))?;
        debug!("Instance alive");
        Ok(liveness)
    }

    pub async fn stop(&self) -> Result<Value, InstanceClientError> {
        self.json(self.request(Method::POST, "/stop")).await
    }

    pub async fn exit(&self) -> Result<Value, InstanceClientError> {
        self.json(self.request(Method::POST, "/exit")).await
    }

    pub async fn report(&self) -> Result<Value, InstanceClientError> {
        self.json(self.request(Method::GET, "/report")).await
    }

    pub async fn set_timeout(&self, timeout_ms: u64) -> Result<Value, InstanceClientError> {
        let builder = self
            .request(Method::PUT, "/timeout")
            .json(&json!({ "timeoutMs": timeout_ms }));
        self.json(builder).await
    }

    /// Names of the instance's log files.
    pub async fn log_files(&self) -> Result<Value, InstanceClientError> {
        self.json(self.request(Method::GET, "/logs")).await
    }

    /// Sync error rows the instance persisted on `day`.
    pub async fn logs_for_day(&self, day: NaiveDate) -> Result<Value, InstanceClientError> {
        let path = format!("/logs/{}", day.format("%Y-%m-%d"));
        self.json(self.request(Method::GET, &path)).await
    }

    /// Contents of one log file.
    pub async fn log_file(&self, file_name: &str) -> Result<String, InstanceClientError> {
        let builder = self
            .request(Method::GET, "/logs-static")
            .query(&[("fileName", file_name)]);
        self.send(builder)
            .await?
            .text()
            .await
            .map_err(|e| InstanceClientError::Decode(e.to_string()))
    }
}
