//! Event-link resolution
//!
//! Maps an event observed on one side to its persisted link, if any.

use std::sync::Arc;

use calsync_core::{EventLink, NewEventLink};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::persistence::{LinkKey, LinkOutcome, PendingRemoval, StoreError, SyncStore};

/// Side on which an event was observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    CalendarEvent { event_id: String, calendar_id: Uuid },
    Page { page_id: String },
}

/// An event seen during a pass, not yet matched to a link.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub tenant_id: Uuid,
    pub observed: Observed,
}

impl Candidate {
    pub fn event(tenant_id: Uuid, event_id: impl Into<String>, calendar_id: Uuid) -> Self {
        Self {
            tenant_id,
            observed: Observed::CalendarEvent {
                event_id: event_id.into(),
                calendar_id,
            },
        }
    }

    pub fn page(tenant_id: Uuid, page_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            observed: Observed::Page {
                page_id: page_id.into(),
            },
        }
    }

    fn key(&self) -> LinkKey {
        match &self.observed {
            Observed::CalendarEvent {
                event_id,
                calendar_id,
            } => LinkKey::for_event(self.tenant_id, event_id.clone(), *calendar_id),
            Observed::Page { page_id } => LinkKey::for_page(self.tenant_id, page_id.clone()),
        }
    }
}

/// Candidate merged with its link.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// True when a link exists
    pub is_synced: bool,
    pub calendar_event_id: Option<String>,
    pub page_id: Option<String>,
    pub calendar_id: Option<Uuid>,
    pub link: Option<EventLink>,
}

impl Resolution {
    fn unlinked(candidate: &Candidate) -> Self {
        match &candidate.observed {
            Observed::CalendarEvent {
                event_id,
                calendar_id,
            } => Self {
                is_synced: false,
                calendar_event_id: Some(event_id.clone()),
                page_id: None,
                calendar_id: Some(*calendar_id),
                link: None,
            },
            Observed::Page { page_id } => Self {
                is_synced: false,
                calendar_event_id: None,
                page_id: Some(page_id.clone()),
                calendar_id: None,
                link: None,
            },
        }
    }

    fn linked(link: EventLink) -> Self {
        Self {
            is_synced: true,
            calendar_event_id: link.calendar_event_id.clone(),
            page_id: link.page_id.clone(),
            calendar_id: Some(link.calendar_id),
            link: Some(link),
        }
    }
}

/// Looks up, creates and retires event links.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn SyncStore>,
}

impl Resolver {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Match `candidate` against the tenant's links in one disjunctive read.
    #[instrument(skip(self), fields(tenant_id = %candidate.tenant_id))]
    pub async fn resolve(&self, candidate: &Candidate) -> Result<Resolution, StoreError> {
        match self.store.find_link(&candidate.key()).await? {
            Some(link) => Ok(Resolution::linked(link)),
            None => {
                debug!("No link for observed event");
                Ok(Resolution::unlinked(candidate))
            }
        }
    }

    /// Atomic lookup-or-insert. Returns the existing link if another pass won.
    pub async fn link_or_create(&self, link: NewEventLink) -> Result<LinkOutcome, StoreError> {
        self.store.link_or_create(link).await
    }

    /// Links queued for removal, each with its calendar.
    pub async fn pending_removals(&self, tenant_id: Uuid) -> Result<Vec<PendingRemoval>, StoreError> {
        self.store.pending_removals(tenant_id).await
    }
}
