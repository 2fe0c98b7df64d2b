//! SyncStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{
    Calendar, CalendarStatus, EventLink, LogRecord, NewEventLink, PlanTier, SyncError, Tenant,
};
use chrono::NaiveDate;
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum StoreError {
    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A write would break a uniqueness or integrity constraint
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify for the pass boundary.
    pub fn into_sync_error(self, tenant_id: Uuid) -> SyncError {
        match self {
            StoreError::NotFound { .. } | StoreError::Conflict(_) | StoreError::Serialization(_) => {
                SyncError::data_integrity("store_integrity", self.to_string(), tenant_id)
            }
            StoreError::Database(_) => SyncError::storage(self.to_string(), tenant_id),
        }
    }
}

/// How a tenant claim is requested.
#[derive(Debug, Clone)]
pub struct ClaimRequest<'a> {
    /// Loop identity recorded as the lease owner
    pub owner: &'a str,
    pub tier: PlanTier,
    /// Lease length; the claim is void once it passes
    pub lease: Duration,
    /// Tenants synced more recently than this are not due
    pub min_interval: Duration,
}

/// Lookup key for an observed event.
///
/// Matches a link by page id, or by calendar event id within a calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkKey {
    pub tenant_id: Uuid,
    pub page_id: Option<String>,
    pub calendar_event: Option<(String, Uuid)>,
}

impl LinkKey {
    pub fn for_event(tenant_id: Uuid, event_id: impl Into<String>, calendar_id: Uuid) -> Self {
        Self {
            tenant_id,
            page_id: None,
            calendar_event: Some((event_id.into(), calendar_id)),
        }
    }

    pub fn for_page(tenant_id: Uuid, page_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            page_id: Some(page_id.into()),
            calendar_event: None,
        }
    }

    pub fn from_new(link: &NewEventLink) -> Self {
        Self {
            tenant_id: link.tenant_id,
            page_id: link.page_id.clone(),
            calendar_event: link
                .calendar_event_id
                .clone()
                .map(|event_id| (event_id, link.calendar_id)),
        }
    }

    /// Whether `link` satisfies this key.
    pub fn matches(&self, link: &EventLink) -> bool {
        if link.tenant_id != self.tenant_id {
            return false;
        }
        let by_page = self.page_id.is_some() && link.page_id == self.page_id;
        let by_event = match &self.calendar_event {
            Some((event_id, calendar_id)) => {
                link.calendar_id == *calendar_id
                    && link.calendar_event_id.as_deref() == Some(event_id.as_str())
            }
            None => false,
        };
        by_page || by_event
    }
}

/// Result of [`SyncStore::link_or_create`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOutcome {
    pub link: EventLink,
    /// False when an existing link was returned
    pub created: bool,
}

/// A link queued for removal together with its calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRemoval {
    pub link: EventLink,
    pub calendar: Calendar,
}

/// Shared store of tenants, calendars, event links and sync log rows
///
/// Every fleet instance talks to the same store. The tenant claim is the only
/// cross-instance mutual exclusion.
#[async_trait]
pub trait SyncStore: Send + Sync + 'static {
    // =========================================================================
    // Tenants
    // =========================================================================

    /// Insert a tenant. Provisioning lives outside the fleet; used by tooling and tests.
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Tenant, StoreError>;

    /// Atomically claim the earliest-due eligible tenant of the requested tier.
    ///
    /// Returns `None` when nothing is eligible.
    async fn claim_next_tenant(&self, request: ClaimRequest<'_>) -> Result<Option<Tenant>, StoreError>;

    /// Claim or renew the lease on one tenant.
    ///
    /// Returns `None` if another owner holds an unexpired lease.
    async fn claim_tenant(
        &self,
        tenant_id: Uuid,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<Tenant>, StoreError>;

    /// Drop `owner`'s lease and stamp `last_synced_at`.
    async fn release_tenant(&self, tenant_id: Uuid, owner: &str) -> Result<(), StoreError>;

    // =========================================================================
    // Calendars
    // =========================================================================

    async fn insert_calendar(&self, calendar: &Calendar) -> Result<(), StoreError>;

    async fn list_calendars(&self, tenant_id: Uuid) -> Result<Vec<Calendar>, StoreError>;

    async fn update_calendar_status(
        &self,
        calendar_id: Uuid,
        status: CalendarStatus,
    ) -> Result<(), StoreError>;

    // =========================================================================
    // Event links
    // =========================================================================

    /// Single disjunctive read: by page id, or by event id within a calendar.
    async fn find_link(&self, key: &LinkKey) -> Result<Option<EventLink>, StoreError>;

    /// Return the link matching `link`, inserting it if none exists.
    ///
    /// An existing link gains whichever side it was missing.
    async fn link_or_create(&self, link: NewEventLink) -> Result<LinkOutcome, StoreError>;

    async fn attach_page(&self, link_id: Uuid, page_id: &str) -> Result<EventLink, StoreError>;

    async fn attach_event(&self, link_id: Uuid, event_id: &str) -> Result<EventLink, StoreError>;

    /// Bump `updated_at` after a counterpart update.
    async fn touch_link(&self, link_id: Uuid) -> Result<(), StoreError>;

    async fn mark_for_removal(&self, link_id: Uuid) -> Result<(), StoreError>;

    /// Links of the tenant that carry a page id and are not marked for removal.
    async fn linked_pages(&self, tenant_id: Uuid) -> Result<Vec<EventLink>, StoreError>;

    /// Every `will_remove` link of the tenant joined with its calendar.
    async fn pending_removals(&self, tenant_id: Uuid) -> Result<Vec<PendingRemoval>, StoreError>;

    async fn delete_link(&self, link_id: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Sync logs
    // =========================================================================

    /// Append a log row. Rows are never updated.
    async fn append_log(&self, record: &LogRecord) -> Result<(), StoreError>;

    /// Rows written by `instance_prefix` on the given UTC day, oldest first.
    async fn logs_for_day(
        &self,
        instance_prefix: &str,
        day: NaiveDate,
    ) -> Result<Vec<LogRecord>, StoreError>;
}
