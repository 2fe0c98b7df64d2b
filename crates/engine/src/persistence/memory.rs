//! In-memory implementation of SyncStore for testing and local runs

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{Calendar, CalendarStatus, EventLink, LogRecord, NewEventLink, Tenant};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// In-memory implementation of SyncStore
///
/// Every claim and every lookup-or-create runs under a single write lock,
/// giving the same atomicity as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use calsync_engine::InMemorySyncStore;
///
/// let store = InMemorySyncStore::new();
/// assert_eq!(store.link_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemorySyncStore {
    tenants: RwLock<HashMap<Uuid, Tenant>>,
    calendars: RwLock<HashMap<Uuid, Calendar>>,
    links: RwLock<HashMap<Uuid, EventLink>>,
    logs: RwLock<Vec<LogRecord>>,
}

impl InMemorySyncStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of event links
    pub fn link_count(&self) -> usize {
        self.links.read().len()
    }

    /// Snapshot of all links of a tenant
    pub fn links_for(&self, tenant_id: Uuid) -> Vec<EventLink> {
        let mut links: Vec<_> = self
            .links
            .read()
            .values()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.created_at);
        links
    }

    /// Snapshot of all log rows
    pub fn log_records(&self) -> Vec<LogRecord> {
        self.logs.read().clone()
    }
}

fn lease_end(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(1))
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&tenant.id) {
            return Err(StoreError::Conflict(format!("tenant {} exists", tenant.id)));
        }
        tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Tenant, StoreError> {
        self.tenants
            .read()
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("tenant", tenant_id))
    }

    async fn claim_next_tenant(&self, request: ClaimRequest<'_>) -> Result<Option<Tenant>, StoreError> {
        let now = Utc::now();
        let min_interval = chrono::Duration::from_std(request.min_interval)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tenants = self.tenants.write();
        let candidate = tenants
            .values()
            .filter(|t| t.is_eligible(request.tier, now, min_interval))
            // NULLS FIRST, then oldest sync, then oldest tenant
            .min_by_key(|t| (t.last_synced_at.is_some(), t.last_synced_at, t.created_at))
            .map(|t| t.id);

        Ok(candidate.and_then(|id| {
            tenants.get_mut(&id).map(|tenant| {
                tenant.claimed_by = Some(request.owner.to_string());
                tenant.claimed_until = Some(lease_end(now, request.lease));
                tenant.clone()
            })
        }))
    }

    async fn claim_tenant(
        &self,
        tenant_id: Uuid,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<Tenant>, StoreError> {
        let now = Utc::now();
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::not_found("tenant", tenant_id))?;

        let held_by_other = tenant.claimed_by.as_deref() != Some(owner)
            && tenant.claimed_until.is_some_and(|until| until > now);
        if held_by_other {
            return Ok(None);
        }

        tenant.claimed_by = Some(owner.to_string());
        tenant.claimed_until = Some(lease_end(now, lease));
        Ok(Some(tenant.clone()))
    }

    async fn release_tenant(&self, tenant_id: Uuid, owner: &str) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::not_found("tenant", tenant_id))?;

        if tenant.claimed_by.as_deref() == Some(owner) {
            tenant.claimed_by = None;
            tenant.claimed_until = None;
            tenant.last_synced_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_calendar(&self, calendar: &Calendar) -> Result<(), StoreError> {
        self.calendars.write().insert(calendar.id, calendar.clone());
        Ok(())
    }

    async fn list_calendars(&self, tenant_id: Uuid) -> Result<Vec<Calendar>, StoreError> {
        let mut calendars: Vec<_> = self
            .calendars
            .read()
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        calendars.sort_by_key(|c| c.created_at);
        Ok(calendars)
    }

    async fn update_calendar_status(
        &self,
        calendar_id: Uuid,
        status: CalendarStatus,
    ) -> Result<(), StoreError> {
        let mut calendars = self.calendars.write();
        let calendar = calendars
            .get_mut(&calendar_id)
            .ok_or_else(|| StoreError::not_found("calendar", calendar_id))?;
        calendar.status = status;
        calendar.updated_at = Utc::now();
        Ok(())
    }

    async fn find_link(&self, key: &LinkKey) -> Result<Option<EventLink>, StoreError> {
        Ok(self
            .links
            .read()
            .values()
            .filter(|l| key.matches(l))
            .min_by_key(|l| l.created_at)
            .cloned())
    }

    async fn link_or_create(&self, new_link: NewEventLink) -> Result<LinkOutcome, StoreError> {
        let key = LinkKey::from_new(&new_link);
        let mut links = self.links.write();

        let existing = links
            .values()
            .filter(|l| key.matches(l))
            .min_by_key(|l| l.created_at)
            .map(|l| l.id);

        if let Some(id) = existing {
            let link = links
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("event_link", id))?;
            if link.page_id.is_none() && new_link.page_id.is_some() {
                link.page_id = new_link.page_id;
                link.updated_at = Utc::now();
            }
            if link.calendar_event_id.is_none() && new_link.calendar_event_id.is_some() {
                link.calendar_event_id = new_link.calendar_event_id;
                link.updated_at = Utc::now();
            }
            return Ok(LinkOutcome {
                link: link.clone(),
                created: false,
            });
        }

        let link = new_link
            .into_link()
            .ok_or_else(|| StoreError::Conflict("event link needs at least one side".into()))?;
        links.insert(link.id, link.clone());
        Ok(LinkOutcome {
            link,
            created: true,
        })
    }

    async fn attach_page(&self, link_id: Uuid, page_id: &str) -> Result<EventLink, StoreError> {
        let mut links = self.links.write();
        let tenant_id = links
            .get(&link_id)
            .map(|l| l.tenant_id)
            .ok_or_else(|| StoreError::not_found("event_link", link_id))?;

        let taken = links.values().any(|l| {
            l.id != link_id && l.tenant_id == tenant_id && l.page_id.as_deref() == Some(page_id)
        });
        if taken {
            return Err(StoreError::Conflict(format!("page {page_id} already linked")));
        }

        let link = links
            .get_mut(&link_id)
            .ok_or_else(|| StoreError::not_found("event_link", link_id))?;
        link.page_id = Some(page_id.to_string());
        link.updated_at = Utc::now();
        Ok(link.clone())
    }

    async fn attach_event(&self, link_id: Uuid, event_id: &str) -> Result<EventLink, StoreError> {
        let mut links = self.links.write();
        let (tenant_id, calendar_id) = links
            .get(&link_id)
            .map(|l| (l.tenant_id, l.calendar_id))
            .ok_or_else(|| StoreError::not_found("event_link", link_id))?;

        let taken = links.values().any(|l| {
            l.id != link_id
                && l.tenant_id == tenant_id
                && l.calendar_id == calendar_id
                && l.calendar_event_id.as_deref() == Some(event_id)
        });
        if taken {
            return Err(StoreError::Conflict(format!("event {event_id} already linked")));
        }

        let link = links
            .get_mut(&link_id)
            .ok_or_else(|| StoreError::not_found("event_link", link_id))?;
        link.calendar_event_id = Some(event_id.to_string());
        link.updated_at = Utc::now();
        Ok(link.clone())
    }

    async fn touch_link(&self, link_id: Uuid) -> Result<(), StoreError> {
        let mut links = self.links.write();
        let link = links
            .get_mut(&link_id)
            .ok_or_else(|| StoreError::not_found("event_link", link_id))?;
        link.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_for_removal(&self, link_id: Uuid) -> Result<(), StoreError> {
        let mut links = self.links.write();
        let link = links
            .get_mut(&link_id)
            .ok_or_else(|| StoreError::not_found("event_link", link_id))?;
        link.will_remove = true;
        link.updated_at = Utc::now();
        Ok(())
    }

    async fn linked_pages(&self, tenant_id: Uuid) -> Result<Vec<EventLink>, StoreError> {
        let mut links: Vec<_> = self
            .links
            .read()
            .values()
            .filter(|l| l.tenant_id == tenant_id && !l.will_remove && l.page_id.is_some())
            .cloned()
            .collect();
        links.sort_by_key(|l| l.created_at);
        Ok(links)
    }

    async fn pending_removals(&self, tenant_id: Uuid) -> Result<Vec<PendingRemoval>, StoreError> {
        let links = self.links.read();
        let calendars = self.calendars.read();

        let mut pending: Vec<_> = links
            .values()
            .filter(|l| l.tenant_id == tenant_id && l.will_remove)
            .filter_map(|l| {
                calendars.get(&l.calendar_id).map(|c| PendingRemoval {
                    link: l.clone(),
                    calendar: c.clone(),
                })
            })
            .collect();
        pending.sort_by_key(|p| p.link.created_at);
        Ok(pending)
    }

    async fn delete_link(&self, link_id: Uuid) -> Result<(), StoreError> {
        self.links.write().remove(&link_id);
        Ok(())
    }

    async fn append_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        self.logs.write().push(record.clone());
        Ok(())
    }

    async fn logs_for_day(
        &self,
        instance_prefix: &str,
        day: NaiveDate,
    ) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self
            .logs
            .read()
            .iter()
            .filter(|r| r.instance_prefix == instance_prefix && r.created_at.date_naive() == day)
            .cloned()
            .collect())
    }
}
