// Sync error model
//
// One tagged error type covers both plain sync failures and upstream API failures.
// `origin` tells them apart; `kind` is the taxonomy handlers match on.

use std::backtrace::Backtrace;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Which variant of sync error this is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// Failure raised by the sync machinery itself.
    Sync,
    /// Failure reported by an upstream provider API.
    Api,
}

/// Error taxonomy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid settings.
    Configuration,
    /// Upstream call failed (after retries, if any).
    UpstreamApi,
    /// Persisted state contradicts itself.
    DataIntegrity,
    /// A bounded wait expired.
    Timeout,
    /// Control-plane credentials did not match.
    Authentication,
    /// The shared store failed.
    Storage,
    /// Anything not classified at the point of failure.
    Internal,
}

/// How the current reconciliation pass proceeds after this error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Remediation {
    /// Halt this tenant's pass.
    #[default]
    Stop,
    /// Re-run the pass for the same tenant.
    Retry,
    /// Skip the failing item and carry on.
    Ignore,
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remediation::Stop => write!(f, "STOP"),
            Remediation::Retry => write!(f, "RETRY"),
            Remediation::Ignore => write!(f, "IGNORE"),
        }
    }
}

impl From<&str> for Remediation {
    fn from(s: &str) -> Self {
        match s {
            "RETRY" => Remediation::Retry,
            "IGNORE" => Remediation::Ignore,
            _ => Remediation::Stop,
        }
    }
}

/// Log severity of an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Error,
    Warn,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        match s {
            "WARN" => Severity::Warn,
            "INFO" => Severity::Info,
            _ => Severity::Error,
        }
    }
}

/// System that produced an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    GoogleCalendar,
    Notion,
    Database,
    Worker,
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSystem::GoogleCalendar => write!(f, "google_calendar"),
            SourceSystem::Notion => write!(f, "notion"),
            SourceSystem::Database => write!(f, "database"),
            SourceSystem::Worker => write!(f, "worker"),
        }
    }
}

/// A classified failure owned by a tenant.
///
/// Errors are terminal values: they are raised once, optionally persisted via
/// [`SyncError::to_log_record`], and never retried internally.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {description}: {detail}")]
pub struct SyncError {
    pub origin: ErrorOrigin,
    pub kind: ErrorKind,
    pub code: String,
    pub source_system: SourceSystem,
    pub description: String,
    pub detail: String,
    pub tenant_id: Uuid,
    pub remediation: Remediation,
    pub severity: Severity,
    pub archived: bool,
    pub stack: String,
    pub created_at: DateTime<Utc>,
}

impl SyncError {
    /// Create a sync error with STOP remediation and ERROR severity.
    pub fn new(
        code: impl Into<String>,
        source_system: SourceSystem,
        description: impl Into<String>,
        detail: impl Into<String>,
        tenant_id: Uuid,
    ) -> Self {
        Self {
            origin: ErrorOrigin::Sync,
            kind: ErrorKind::Internal,
            code: code.into(),
            source_system,
            description: description.into(),
            detail: detail.into(),
            tenant_id,
            remediation: Remediation::default(),
            severity: Severity::default(),
            archived: false,
            stack: Backtrace::capture().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Create an upstream API error.
    pub fn api(
        code: impl Into<String>,
        source_system: SourceSystem,
        description: impl Into<String>,
        detail: impl Into<String>,
        tenant_id: Uuid,
    ) -> Self {
        let mut err = Self::new(code, source_system, description, detail, tenant_id);
        err.origin = ErrorOrigin::Api;
        err.kind = ErrorKind::UpstreamApi;
        err
    }

    /// Missing or unresolvable configuration for a tenant (never retried).
    pub fn configuration(code: impl Into<String>, detail: impl Into<String>, tenant_id: Uuid) -> Self {
        Self::new(
            code,
            SourceSystem::Worker,
            "configuration error",
            detail,
            tenant_id,
        )
        .with_kind(ErrorKind::Configuration)
    }

    /// Persisted state is inconsistent.
    pub fn data_integrity(code: impl Into<String>, detail: impl Into<String>, tenant_id: Uuid) -> Self {
        Self::new(
            code,
            SourceSystem::Database,
            "data integrity violation",
            detail,
            tenant_id,
        )
        .with_kind(ErrorKind::DataIntegrity)
    }

    /// A bounded wait expired.
    pub fn timeout(detail: impl Into<String>, tenant_id: Uuid) -> Self {
        Self::new(
            "timeout",
            SourceSystem::Worker,
            "operation timed out",
            detail,
            tenant_id,
        )
        .with_kind(ErrorKind::Timeout)
    }

    /// The shared store failed.
    pub fn storage(detail: impl Into<String>, tenant_id: Uuid) -> Self {
        Self::new(
            "storage_error",
            SourceSystem::Database,
            "shared store failure",
            detail,
            tenant_id,
        )
        .with_kind(ErrorKind::Storage)
    }

    /// Wrap an unclassified failure. Always STOP.
    pub fn unclassified(err: &anyhow::Error, tenant_id: Uuid) -> Self {
        Self::new(
            "unclassified",
            SourceSystem::Worker,
            "unclassified failure",
            format!("{err:#}"),
            tenant_id,
        )
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = remediation;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn is_api(&self) -> bool {
        self.origin == ErrorOrigin::Api
    }

    /// Whether this error ends the tenant's current pass.
    pub fn finishes_work(&self) -> bool {
        self.remediation == Remediation::Stop
    }

    /// Convert to the persisted log record.
    pub fn to_log_record(&self, instance_prefix: &str) -> LogRecord {
        LogRecord {
            id: Uuid::now_v7(),
            code: self.code.clone(),
            source_system: self.source_system.to_string(),
            description: self.description.clone(),
            detail: self.detail.clone(),
            stack: self.stack.clone(),
            level: self.severity,
            remediation: self.remediation,
            archive: self.archived,
            finish_work: self.finishes_work(),
            tenant_id: self.tenant_id,
            instance_prefix: instance_prefix.to_string(),
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Append-only persisted log row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: Uuid,
    pub code: String,
    pub source_system: String,
    pub description: String,
    pub detail: String,
    pub stack: String,
    pub level: Severity,
    pub remediation: Remediation,
    pub archive: bool,
    pub finish_work: bool,
    pub tenant_id: Uuid,
    pub instance_prefix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Upstream client errors
// ============================================================================

/// Failure of a single upstream provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Call timed out after {0}ms")]
    Timeout(u64),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 404, or 410 for deleted provider objects.
    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Status { status, .. } => *status == 429 || *status >= 500,
            ClientError::Transport(_) | ClientError::Timeout(_) => true,
            ClientError::Decode(_) | ClientError::Configuration(_) => false,
        }
    }

    /// Classify into a terminal sync error for `tenant_id`.
    pub fn into_sync_error(self, source_system: SourceSystem, tenant_id: Uuid) -> SyncError {
        match self {
            ClientError::Configuration(detail) => {
                SyncError::configuration("provider_configuration", detail, tenant_id)
            }
            ClientError::Timeout(ms) => {
                SyncError::timeout(format!("{source_system} call exceeded {ms}ms"), tenant_id)
            }
            ClientError::Status { status, body } => SyncError::api(
                format!("api_status_{status}"),
                source_system,
                "upstream call failed",
                body,
                tenant_id,
            ),
            ClientError::Transport(detail) => SyncError::api(
                "api_transport",
                source_system,
                "upstream unreachable",
                detail,
                tenant_id,
            ),
            ClientError::Decode(detail) => SyncError::api(
                "api_decode",
                source_system,
                "unexpected upstream response",
                detail,
                tenant_id,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncError {
        SyncError::new(
            "calendar_missing",
            SourceSystem::GoogleCalendar,
            "calendar not found",
            "primary calendar deleted",
            Uuid::now_v7(),
        )
    }

    #[test]
    fn test_defaults() {
        let err = sample();
        assert_eq!(err.origin, ErrorOrigin::Sync);
        assert_eq!(err.remediation, Remediation::Stop);
        assert_eq!(err.severity, Severity::Error);
        assert!(!err.archived);
        assert!(err.finishes_work());
    }

    #[test]
    fn test_api_variant() {
        let err = SyncError::api(
            "rate_limited",
            SourceSystem::Notion,
            "rate limited",
            "429",
            Uuid::now_v7(),
        )
        .with_remediation(Remediation::Retry);

        assert!(err.is_api());
        assert_eq!(err.kind, ErrorKind::UpstreamApi);
        assert!(!err.finishes_work());
    }

    #[test]
    fn test_to_log_record() {
        let err = sample()
            .with_severity(Severity::Warn)
            .with_remediation(Remediation::Ignore)
            .with_archived(true);
        let record = err.to_log_record("eu-1");

        assert_eq!(record.code, "calendar_missing");
        assert_eq!(record.source_system, "google_calendar");
        assert_eq!(record.level, Severity::Warn);
        assert_eq!(record.remediation, Remediation::Ignore);
        assert!(record.archive);
        assert!(!record.finish_work);
        assert_eq!(record.tenant_id, err.tenant_id);
        assert_eq!(record.instance_prefix, "eu-1");
        assert_eq!(record.created_at, err.created_at);
    }

    #[test]
    fn test_display() {
        let err = sample();
        assert_eq!(
            err.to_string(),
            "[calendar_missing] calendar not found: primary calendar deleted"
        );
    }

    #[test]
    fn test_unclassified_is_stop() {
        let err = SyncError::unclassified(&anyhow::anyhow!("boom"), Uuid::nil());
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.remediation, Remediation::Stop);
        assert_eq!(err.detail, "boom");
    }

    #[test]
    fn test_remediation_serialization() {
        let json = serde_json::to_string(&Remediation::Retry).unwrap();
        assert_eq!(json, "\"RETRY\"");
        assert_eq!(Remediation::from("IGNORE"), Remediation::Ignore);
        assert_eq!(Remediation::from("unknown"), Remediation::Stop);
    }

    #[test]
    fn test_client_error_classification() {
        let not_found = ClientError::Status {
            status: 404,
            body: "gone".into(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_retryable());

        let throttled = ClientError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(throttled.is_retryable());
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(!ClientError::Configuration("no url".into()).is_retryable());
    }

    #[test]
    fn test_client_error_into_sync_error() {
        let tenant = Uuid::now_v7();
        let err = ClientError::Status {
            status: 503,
            body: "unavailable".into(),
        }
        .into_sync_error(SourceSystem::Notion, tenant);
        assert!(err.is_api());
        assert_eq!(err.code, "api_status_503");
        assert_eq!(err.tenant_id, tenant);

        let err = ClientError::Configuration("unknown callback version".into())
            .into_sync_error(SourceSystem::GoogleCalendar, tenant);
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert_eq!(err.remediation, Remediation::Stop);
    }
}
