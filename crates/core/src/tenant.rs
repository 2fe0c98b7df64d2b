// Tenant domain types
//
// Tenants are provisioned externally. The sync fleet only reads and claims them;
// calendars are the one part of a tenant the reconciler mutates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SyncError;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Service tier. Each tier gets its own set of worker loops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Init,
    Pro,
    Free,
    Sponsor,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [
        PlanTier::Init,
        PlanTier::Pro,
        PlanTier::Free,
        PlanTier::Sponsor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Init => "init",
            PlanTier::Pro => "pro",
            PlanTier::Free => "free",
            PlanTier::Sponsor => "sponsor",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "init" => Ok(PlanTier::Init),
            "pro" => Ok(PlanTier::Pro),
            "free" => Ok(PlanTier::Free),
            "sponsor" => Ok(PlanTier::Sponsor),
            other => Err(format!("unknown plan tier: {other}")),
        }
    }
}

/// An account whose calendar and document data are kept in sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub plan: PlanTier,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub stopped: bool,

    // Google credentials
    #[serde(skip_serializing)]
    pub google_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub google_refresh_token: Option<String>,
    /// Key into the callback URL map the tenant's Google grant was issued against.
    pub callback_version: Option<String>,

    // Notion credentials
    #[serde(skip_serializing)]
    pub notion_token: Option<String>,
    /// Document database bound to this tenant.
    pub database_id: Option<String>,

    /// Per-tenant window override, in days before now.
    pub time_min_days: Option<i64>,
    /// Per-tenant window override, in days after now.
    pub time_max_days: Option<i64>,

    pub last_synced_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// A fresh, unclaimed tenant with no credentials.
    pub fn new(plan: PlanTier) -> Self {
        Self {
            id: Uuid::now_v7(),
            plan,
            paused: false,
            stopped: false,
            google_access_token: None,
            google_refresh_token: None,
            callback_version: None,
            notion_token: None,
            database_id: None,
            time_min_days: None,
            time_max_days: None,
            last_synced_at: None,
            claimed_by: None,
            claimed_until: None,
            created_at: Utc::now(),
        }
    }

    /// Whether a loop of `tier` may claim this tenant at `now`.
    pub fn is_eligible(&self, tier: PlanTier, now: DateTime<Utc>, min_interval: Duration) -> bool {
        if self.plan != tier || self.paused || self.stopped {
            return false;
        }
        if self.claimed_until.is_some_and(|until| until > now) {
            return false;
        }
        match self.last_synced_at {
            None => true,
            Some(last) => last + min_interval <= now,
        }
    }

    /// Sync window, using tenant overrides when present.
    ///
    /// Negative or unrepresentable day counts are a configuration error.
    pub fn window(
        &self,
        now: DateTime<Utc>,
        default_min_days: i64,
        default_max_days: i64,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), SyncError> {
        let min_days = self.time_min_days.unwrap_or(default_min_days);
        let max_days = self.time_max_days.unwrap_or(default_max_days);

        let invalid = || {
            SyncError::configuration(
                "invalid_sync_window",
                format!("sync window of -{min_days}/+{max_days} days is out of range"),
                self.id,
            )
        };
        if min_days < 0 || max_days < 0 {
            return Err(invalid());
        }

        let min = Duration::try_days(min_days)
            .and_then(|d| now.checked_sub_signed(d))
            .ok_or_else(invalid)?;
        let max = Duration::try_days(max_days)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(invalid)?;
        Ok((min, max))
    }
}

/// Connection status of a calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalendarStatus {
    /// Provider access was lost.
    Disconnected,
    /// Selected by the tenant, document-side property not yet created.
    Pending,
    /// Fully wired on both sides.
    Connected,
}

impl std::fmt::Display for CalendarStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarStatus::Disconnected => write!(f, "DISCONNECTED"),
            CalendarStatus::Pending => write!(f, "PENDING"),
            CalendarStatus::Connected => write!(f, "CONNECTED"),
        }
    }
}

impl From<&str> for CalendarStatus {
    fn from(s: &str) -> Self {
        match s {
            "PENDING" => CalendarStatus::Pending,
            "CONNECTED" => CalendarStatus::Connected,
            _ => CalendarStatus::Disconnected,
        }
    }
}

/// A provider calendar bound to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Calendar {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Calendar identifier on the provider side.
    pub provider_calendar_id: String,
    pub access_role: Option<String>,
    /// Select-option name routing a document page to this calendar.
    pub property_binding: String,
    pub status: CalendarStatus,
    #[serde(default)]
    pub primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Calendar {
    pub fn new(tenant_id: Uuid, provider_calendar_id: impl Into<String>, property_binding: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            provider_calendar_id: provider_calendar_id.into(),
            access_role: None,
            property_binding: property_binding.into(),
            status: CalendarStatus::Pending,
            primary: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: CalendarStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }
}
