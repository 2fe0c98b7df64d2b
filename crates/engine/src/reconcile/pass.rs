//! One reconciliation pass for one claimed tenant
//!
//! Order of work:
//! 1. Provider clients and the bound document database
//! 2. Calendar access and property bindings
//! 3. Calendar side, then document side, each event through the resolver
//! 4. Linked pages the query no longer returns, checked one by one
//! 5. Pending removals
//!
//! Per-event failures classified IGNORE are collected and skipped; any other
//! failure ends the pass.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{
    Calendar, CalendarEvent, CalendarProvider, CalendarStatus, ClientError, ClientResult,
    DatabaseInfo, DocumentPage, DocumentProvider, EventDraft, NewEventLink, PageDraft,
    ProviderFactory, Remediation, Severity, SourceSystem, SyncError, Tenant, TimeWindow,
};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::resolver::{Candidate, Resolver};
use crate::persistence::{StoreError, SyncStore};
use crate::reliability::with_timeout;

/// Window and per-call bounds of a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSettings {
    /// Default window start, in days before now
    pub time_min_days: i64,
    /// Default window end, in days after now
    pub time_max_days: i64,
    /// Bound on each upstream call (retries included)
    pub call_timeout: Duration,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            time_min_days: 30,
            time_max_days: 90,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// What a pass changed.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub pages_created: usize,
    pub pages_updated: usize,
    pub events_created: usize,
    pub events_updated: usize,
    pub links_marked: usize,
    pub links_removed: usize,
    pub calendars_connected: usize,
    pub calendars_disconnected: usize,
    /// Per-event failures that were skipped
    pub ignored: Vec<SyncError>,
}

/// Runs a full pass for a tenant. The scheduler's seam for tests.
#[async_trait]
pub trait PassRunner: Send + Sync + 'static {
    async fn run(&self, tenant: &Tenant) -> Result<PassSummary, SyncError>;
}

/// Reconciles a tenant's calendars with its document database.
pub struct ReconcilePass {
    store: Arc<dyn SyncStore>,
    resolver: Resolver,
    providers: Arc<dyn ProviderFactory>,
    settings: PassSettings,
}

/// Per-tenant state threaded through the steps of a pass.
struct PassScope {
    tenant_id: Uuid,
    database_id: String,
    window: TimeWindow,
    calendar: Arc<dyn CalendarProvider>,
    documents: Arc<dyn DocumentProvider>,
    /// Connected calendars keyed by internal id
    active: HashMap<Uuid, Calendar>,
    summary: PassSummary,
}

impl PassScope {
    fn calendar_for_binding(&self, binding: Option<&str>) -> Option<&Calendar> {
        binding
            .and_then(|b| self.active.values().find(|c| c.property_binding == b))
            .or_else(|| self.active.values().find(|c| c.primary))
    }
}

fn store_err(tenant_id: Uuid) -> impl Fn(StoreError) -> SyncError {
    move |e| e.into_sync_error(tenant_id)
}

/// Classify a failed upstream call. Transient failures ask for a pass retry;
/// an exceeded bounded wait stops the pass.
fn upstream(err: ClientError, source: SourceSystem, tenant_id: Uuid) -> SyncError {
    let remediation = match err {
        ClientError::Timeout(_) => Remediation::Stop,
        _ if err.is_retryable() => Remediation::Retry,
        _ => Remediation::Stop,
    };
    err.into_sync_error(source, tenant_id)
        .with_remediation(remediation)
}

/// Like [`upstream`], but an object that vanished only skips the current event.
fn per_event(err: ClientError, source: SourceSystem, tenant_id: Uuid) -> SyncError {
    if err.is_not_found() {
        return err
            .into_sync_error(source, tenant_id)
            .with_remediation(Remediation::Ignore)
            .with_severity(Severity::Warn);
    }
    upstream(err, source, tenant_id)
}

impl ReconcilePass {
    pub fn new(
        store: Arc<dyn SyncStore>,
        providers: Arc<dyn ProviderFactory>,
        settings: PassSettings,
    ) -> Self {
        Self {
            resolver: Resolver::new(store.clone()),
            store,
            providers,
            settings,
        }
    }

    async fn call<T, F>(&self, fut: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        match with_timeout(self.settings.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(
                self.settings.call_timeout.as_millis() as u64,
            )),
        }
    }

    /// Skip an event on IGNORE, propagate anything else.
    fn absorb(&self, scope: &mut PassScope, result: Result<(), SyncError>) -> Result<(), SyncError> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.remediation == Remediation::Ignore => {
                warn!(tenant_id = %scope.tenant_id, code = %err.code, detail = %err.detail, "Skipping event");
                scope.summary.ignored.push(err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    async fn open(&self, tenant: &Tenant) -> Result<(PassScope, DatabaseInfo), SyncError> {
        let calendar = self.providers.calendar_for(tenant)?;
        let documents = self.providers.documents_for(tenant)?;

        let database_id = tenant.database_id.clone().ok_or_else(|| {
            SyncError::configuration("database_unbound", "tenant has no document database", tenant.id)
        })?;

        let database = self
            .call(documents.get_database(&database_id))
            .await
            .map_err(|e| upstream(e, SourceSystem::Notion, tenant.id))?
            .ok_or_else(|| {
                SyncError::data_integrity(
                    "database_missing",
                    format!("document database {database_id} does not exist"),
                    tenant.id,
                )
            })?;

        let (min, max) = tenant.window(
            Utc::now(),
            self.settings.time_min_days,
            self.settings.time_max_days,
        )?;

        let scope = PassScope {
            tenant_id: tenant.id,
            database_id,
            window: TimeWindow::new(min, max),
            calendar,
            documents,
            active: HashMap::new(),
            summary: PassSummary::default(),
        };
        Ok((scope, database))
    }

    /// Drop calendars whose access was lost; wire pending ones.
    async fn check_calendars(
        &self,
        scope: &mut PassScope,
        mut database: DatabaseInfo,
    ) -> Result<(), SyncError> {
        let calendars = self
            .store
            .list_calendars(scope.tenant_id)
            .await
            .map_err(store_err(scope.tenant_id))?;

        for calendar in calendars {
            if calendar.status == CalendarStatus::Disconnected {
                continue;
            }

            let access = self
                .call(scope.calendar.get_calendar(&calendar.provider_calendar_id))
                .await;
            let lost = match &access {
                Ok(info) => !info.access_role.is_writeable(),
                Err(e) => e.is_not_found() || e.is_forbidden(),
            };
            if lost {
                info!(tenant_id = %scope.tenant_id, calendar_id = %calendar.id, "Calendar access lost, disconnecting");
                self.store
                    .update_calendar_status(calendar.id, CalendarStatus::Disconnected)
                    .await
                    .map_err(store_err(scope.tenant_id))?;
                scope.summary.calendars_disconnected += 1;
                continue;
            }
            access.map_err(|e| upstream(e, SourceSystem::GoogleCalendar, scope.tenant_id))?;

            let mut calendar = calendar;
            if calendar.status == CalendarStatus::Pending {
                if !database.has_binding(&calendar.property_binding) {
                    database = self
                        .call(
                            scope
                                .documents
                                .add_property(&scope.database_id, &calendar.property_binding),
                        )
                        .await
                        .map_err(|e| upstream(e, SourceSystem::Notion, scope.tenant_id))?;
                }
                self.store
                    .update_calendar_status(calendar.id, CalendarStatus::Connected)
                    .await
                    .map_err(store_err(scope.tenant_id))?;
                calendar.status = CalendarStatus::Connected;
                scope.summary.calendars_connected += 1;
            }
            scope.active.insert(calendar.id, calendar);
        }
        Ok(())
    }

    // =========================================================================
    // Calendar side
    // =========================================================================

    async fn sync_calendar_side(&self, scope: &mut PassScope) -> Result<(), SyncError> {
        let mut calendars: Vec<Calendar> = scope.active.values().cloned().collect();
        calendars.sort_by_key(|c| c.created_at);

        for calendar in calendars {
            let events = self
                .call(
                    scope
                        .calendar
                        .list_events(&calendar.provider_calendar_id, scope.window),
                )
                .await
                .map_err(|e| upstream(e, SourceSystem::GoogleCalendar, scope.tenant_id))?;

            debug!(tenant_id = %scope.tenant_id, calendar_id = %calendar.id, count = events.len(), "Listed events");

            for event in events {
                let result = self.sync_event(scope, &calendar, &event).await;
                self.absorb(scope, result)?;
            }
        }
        Ok(())
    }

    async fn sync_event(
        &self,
        scope: &mut PassScope,
        calendar: &Calendar,
        event: &CalendarEvent,
    ) -> Result<(), SyncError> {
        let tenant_id = scope.tenant_id;
        let resolution = self
            .resolver
            .resolve(&Candidate::event(tenant_id, event.id.clone(), calendar.id))
            .await
            .map_err(store_err(tenant_id))?;

        let link = match resolution.link {
            Some(link) => link,
            None if event.cancelled => return Ok(()),
            None => {
                let draft = PageDraft::from_event(event, &calendar.property_binding);
                let page = self
                    .call(scope.documents.create_page(&scope.database_id, &draft))
                    .await
                    .map_err(|e| per_event(e, SourceSystem::Notion, tenant_id))?;
                scope.summary.pages_created += 1;

                let outcome = self
                    .resolver
                    .link_or_create(NewEventLink {
                        calendar_event_id: Some(event.id.clone()),
                        page_id: Some(page.id.clone()),
                        calendar_id: calendar.id,
                        tenant_id,
                    })
                    .await
                    .map_err(store_err(tenant_id))?;

                if !outcome.created && outcome.link.page_id.as_deref() != Some(page.id.as_str()) {
                    // Another pass linked this event first; drop our copy
                    debug!(%tenant_id, page_id = %page.id, "Archiving duplicate page");
                    self.call(scope.documents.archive_page(&page.id))
                        .await
                        .map_err(|e| per_event(e, SourceSystem::Notion, tenant_id))?;
                    scope.summary.pages_created -= 1;
                }
                return Ok(());
            }
        };

        if link.will_remove {
            return Ok(());
        }

        if event.cancelled {
            self.store
                .mark_for_removal(link.id)
                .await
                .map_err(store_err(tenant_id))?;
            scope.summary.links_marked += 1;
            return Ok(());
        }

        let draft = PageDraft::from_event(event, &calendar.property_binding);
        match &link.page_id {
            None => {
                let page = self
                    .call(scope.documents.create_page(&scope.database_id, &draft))
                    .await
                    .map_err(|e| per_event(e, SourceSystem::Notion, tenant_id))?;
                self.store
                    .attach_page(link.id, &page.id)
                    .await
                    .map_err(store_err(tenant_id))?;
                scope.summary.pages_created += 1;
            }
            Some(page_id) if event.updated > link.updated_at => {
                self.call(scope.documents.update_page(page_id, &draft))
                    .await
                    .map_err(|e| per_event(e, SourceSystem::Notion, tenant_id))?;
                self.store
                    .touch_link(link.id)
                    .await
                    .map_err(store_err(tenant_id))?;
                scope.summary.pages_updated += 1;
            }
            Some(_) => {}
        }
        Ok(())
    }

    // =========================================================================
    // Document side
    // =========================================================================

    async fn sync_document_side(&self, scope: &mut PassScope) -> Result<(), SyncError> {
        let pages = self
            .call(scope.documents.query_pages(&scope.database_id, scope.window))
            .await
            .map_err(|e| upstream(e, SourceSystem::Notion, scope.tenant_id))?;

        debug!(tenant_id = %scope.tenant_id, count = pages.len(), "Queried pages");

        let seen: HashSet<String> = pages.iter().map(|p| p.id.clone()).collect();
        for page in pages {
            let result = self.sync_page(scope, &page).await;
            self.absorb(scope, result)?;
        }

        self.sweep_unlisted_pages(scope, &seen).await
    }

    /// Database queries omit archived and deleted pages, so a linked page
    /// missing from the query is fetched directly.
    async fn sweep_unlisted_pages(
        &self,
        scope: &mut PassScope,
        seen: &HashSet<String>,
    ) -> Result<(), SyncError> {
        let tenant_id = scope.tenant_id;
        let links = self
            .store
            .linked_pages(tenant_id)
            .await
            .map_err(store_err(tenant_id))?;

        for link in links {
            let Some(page_id) = link.page_id.as_deref() else {
                continue;
            };
            if seen.contains(page_id) || !scope.active.contains_key(&link.calendar_id) {
                continue;
            }

            let fetched = self.call(scope.documents.get_page(page_id)).await;
            let gone = match fetched {
                Ok(page) => page.archived,
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    let result = Err(per_event(e, SourceSystem::Notion, tenant_id));
                    self.absorb(scope, result)?;
                    continue;
                }
            };
            if gone {
                debug!(%tenant_id, page_id, "Linked page removed upstream");
                self.store
                    .mark_for_removal(link.id)
                    .await
                    .map_err(store_err(tenant_id))?;
                scope.summary.links_marked += 1;
            }
        }
        Ok(())
    }

    async fn sync_page(&self, scope: &mut PassScope, page: &DocumentPage) -> Result<(), SyncError> {
        let tenant_id = scope.tenant_id;
        let resolution = self
            .resolver
            .resolve(&Candidate::page(tenant_id, page.id.clone()))
            .await
            .map_err(store_err(tenant_id))?;

        let draft = EventDraft::from_page(page);

        let link = match resolution.link {
            Some(link) => link,
            None if page.archived => return Ok(()),
            None => {
                let Some(draft) = draft else {
                    debug!(%tenant_id, page_id = %page.id, "Undated page, skipping");
                    return Ok(());
                };
                let Some(calendar) = scope
                    .calendar_for_binding(page.calendar_property.as_deref())
                    .cloned()
                else {
                    return Err(SyncError::new(
                        "no_target_calendar",
                        SourceSystem::Notion,
                        "no connected calendar for page",
                        format!("page {} has no matching calendar", page.id),
                        tenant_id,
                    )
                    .with_remediation(Remediation::Ignore)
                    .with_severity(Severity::Warn));
                };

                let event = self
                    .call(
                        scope
                            .calendar
                            .insert_event(&calendar.provider_calendar_id, &draft),
                    )
                    .await
                    .map_err(|e| per_event(e, SourceSystem::GoogleCalendar, tenant_id))?;
                scope.summary.events_created += 1;

                let outcome = self
                    .resolver
                    .link_or_create(NewEventLink {
                        calendar_event_id: Some(event.id.clone()),
                        page_id: Some(page.id.clone()),
                        calendar_id: calendar.id,
                        tenant_id,
                    })
                    .await
                    .map_err(store_err(tenant_id))?;

                if !outcome.created
                    && outcome.link.calendar_event_id.as_deref() != Some(event.id.as_str())
                {
                    debug!(%tenant_id, event_id = %event.id, "Deleting duplicate event");
                    self.call(
                        scope
                            .calendar
                            .delete_event(&calendar.provider_calendar_id, &event.id),
                    )
                    .await
                    .map_err(|e| per_event(e, SourceSystem::GoogleCalendar, tenant_id))?;
                    scope.summary.events_created -= 1;
                }
                return Ok(());
            }
        };

        if link.will_remove {
            return Ok(());
        }

        if page.archived {
            self.store
                .mark_for_removal(link.id)
                .await
                .map_err(store_err(tenant_id))?;
            scope.summary.links_marked += 1;
            return Ok(());
        }

        // Links on disconnected calendars are left alone
        let Some(calendar) = scope.active.get(&link.calendar_id).cloned() else {
            return Ok(());
        };
        let Some(draft) = draft else {
            debug!(%tenant_id, page_id = %page.id, "Undated page, skipping");
            return Ok(());
        };

        match &link.calendar_event_id {
            None => {
                let event = self
                    .call(
                        scope
                            .calendar
                            .insert_event(&calendar.provider_calendar_id, &draft),
                    )
                    .await
                    .map_err(|e| per_event(e, SourceSystem::GoogleCalendar, tenant_id))?;
                self.store
                    .attach_event(link.id, &event.id)
                    .await
                    .map_err(store_err(tenant_id))?;
                scope.summary.events_created += 1;
            }
            Some(event_id) if page.last_edited > link.updated_at => {
                self.call(scope.calendar.patch_event(
                    &calendar.provider_calendar_id,
                    event_id,
                    &draft,
                ))
                .await
                .map_err(|e| per_event(e, SourceSystem::GoogleCalendar, tenant_id))?;
                self.store
                    .touch_link(link.id)
                    .await
                    .map_err(store_err(tenant_id))?;
                scope.summary.events_updated += 1;
            }
            Some(_) => {}
        }
        Ok(())
    }

    // =========================================================================
    // Removals
    // =========================================================================

    async fn process_removals(&self, scope: &mut PassScope) -> Result<(), SyncError> {
        let tenant_id = scope.tenant_id;
        let pending = self
            .resolver
            .pending_removals(tenant_id)
            .await
            .map_err(store_err(tenant_id))?;

        for removal in pending {
            let link = &removal.link;

            if let Some(event_id) = &link.calendar_event_id {
                match self
                    .call(
                        scope
                            .calendar
                            .delete_event(&removal.calendar.provider_calendar_id, event_id),
                    )
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(upstream(e, SourceSystem::GoogleCalendar, tenant_id)),
                }
            }

            if let Some(page_id) = &link.page_id {
                match self.call(scope.documents.archive_page(page_id)).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(upstream(e, SourceSystem::Notion, tenant_id)),
                }
            }

            self.store
                .delete_link(link.id)
                .await
                .map_err(store_err(tenant_id))?;
            scope.summary.links_removed += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl PassRunner for ReconcilePass {
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id, tier = %tenant.plan))]
    async fn run(&self, tenant: &Tenant) -> Result<PassSummary, SyncError> {
        let (mut scope, database) = self.open(tenant).await?;

        self.check_calendars(&mut scope, database).await?;
        self.sync_calendar_side(&mut scope).await?;
        self.sync_document_side(&mut scope).await?;
        self.process_removals(&mut scope).await?;

        let summary = scope.summary;
        info!(
            pages_created = summary.pages_created,
            pages_updated = summary.pages_updated,
            events_created = summary.events_created,
            events_updated = summary.events_updated,
            links_removed = summary.links_removed,
            ignored = summary.ignored.len(),
            "Pass complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCalendar, FakeDocuments, FakeProviders};
    use crate::persistence::InMemorySyncStore;
    use calsync_core::{AccessRole, ErrorKind, PlanTier};

    struct Fixture {
        store: Arc<InMemorySyncStore>,
        providers: FakeProviders,
        pass: ReconcilePass,
        tenant: Tenant,
        calendar: Calendar,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemorySyncStore::new());
        let calendar_fake = FakeCalendar::new();
        calendar_fake.add_calendar("primary", AccessRole::Owner);
        let providers = FakeProviders::new(calendar_fake, FakeDocuments::with_database("db-1", &["Work"]));

        let mut tenant = Tenant::new(PlanTier::Pro);
        tenant.database_id = Some("db-1".into());
        store.insert_tenant(&tenant).await.unwrap();

        let calendar = Calendar::new(tenant.id, "primary", "Work")
            .with_status(CalendarStatus::Connected)
            .with_primary(true);
        store.insert_calendar(&calendar).await.unwrap();

        let pass = ReconcilePass::new(
            store.clone(),
            Arc::new(providers.clone()),
            PassSettings::default(),
        );
        Fixture {
            store,
            providers,
            pass,
            tenant,
            calendar,
        }
    }

    fn event_draft(summary: &str) -> EventDraft {
        let start = Utc::now() + chrono::Duration::days(1);
        EventDraft {
            summary: summary.into(),
            description: None,
            start,
            end: start + chrono::Duration::hours(1),
            all_day: false,
        }
    }

    fn page_draft(title: &str, binding: &str) -> PageDraft {
        let start = Utc::now() + chrono::Duration::days(2);
        PageDraft {
            title: title.into(),
            calendar_property: binding.into(),
            description: None,
            start,
            end: start + chrono::Duration::hours(1),
            all_day: false,
        }
    }

    fn not_found() -> ClientError {
        ClientError::Status {
            status: 404,
            body: "gone".into(),
        }
    }

    #[tokio::test]
    async fn test_event_creates_one_page_and_link() {
        let f = fixture().await;
        let event = f.providers.calendar.seed_event("primary", &event_draft("Standup"));

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.pages_created, 1);
        assert_eq!(f.providers.documents.live_page_count(), 1);

        let links = f.store.links_for(f.tenant.id);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].calendar_event_id.as_deref(), Some(event.id.as_str()));
        assert_eq!(links[0].calendar_id, f.calendar.id);

        // A second pass finds everything linked
        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.pages_created, 0);
        assert_eq!(summary.events_created, 0);
        assert_eq!(f.store.link_count(), 1);
        assert_eq!(f.providers.calendar.event_count(), 1);
    }

    #[tokio::test]
    async fn test_page_creates_event_on_bound_calendar() {
        let f = fixture().await;
        let page = f.providers.documents.seed_page(&page_draft("Review", "Work"));

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.events_created, 1);

        let events = f.providers.calendar.events("primary");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "Review");

        let links = f.store.links_for(f.tenant.id);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].page_id.as_deref(), Some(page.id.as_str()));
        assert_eq!(links[0].calendar_event_id.as_deref(), Some(events[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_cancelled_event_removes_both_sides() {
        let f = fixture().await;
        let event = f.providers.calendar.seed_event("primary", &event_draft("Standup"));
        f.pass.run(&f.tenant).await.unwrap();

        f.providers.calendar.cancel_event("primary", &event.id);
        let summary = f.pass.run(&f.tenant).await.unwrap();

        assert_eq!(summary.links_marked, 1);
        assert_eq!(summary.links_removed, 1);
        assert_eq!(f.store.link_count(), 0);
        assert_eq!(f.providers.documents.live_page_count(), 0);
        assert_eq!(f.providers.calendar.event_count(), 0);
    }

    #[tokio::test]
    async fn test_removal_tolerates_missing_page() {
        let f = fixture().await;
        f.providers.calendar.seed_event("primary", &event_draft("Standup"));
        f.pass.run(&f.tenant).await.unwrap();

        let link = f.store.links_for(f.tenant.id).remove(0);
        f.store.mark_for_removal(link.id).await.unwrap();
        f.providers.documents.fail_on("archive_page", not_found());

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.links_removed, 1);
        assert_eq!(f.store.link_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_access_disconnects_calendar() {
        let f = fixture().await;
        f.providers.calendar.remove_calendar("primary");

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.calendars_disconnected, 1);

        let calendars = f.store.list_calendars(f.tenant.id).await.unwrap();
        assert_eq!(calendars[0].status, CalendarStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_read_only_calendar_is_disconnected() {
        let f = fixture().await;
        f.providers.calendar.add_calendar("primary", AccessRole::Reader);

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.calendars_disconnected, 1);
    }

    #[tokio::test]
    async fn test_pending_calendar_gets_property_and_connects() {
        let f = fixture().await;
        f.providers.calendar.add_calendar("family", AccessRole::Writer);
        let pending = Calendar::new(f.tenant.id, "family", "Home");
        f.store.insert_calendar(&pending).await.unwrap();

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.calendars_connected, 1);
        assert!(f.providers.documents.database().unwrap().has_binding("Home"));

        let status = f
            .store
            .list_calendars(f.tenant.id)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.id == pending.id)
            .map(|c| c.status);
        assert_eq!(status, Some(CalendarStatus::Connected));
    }

    #[tokio::test]
    async fn test_missing_database_stops_pass() {
        let mut f = fixture().await;
        f.tenant.database_id = Some("db-gone".into());

        let err = f.pass.run(&f.tenant).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataIntegrity);
        assert!(err.finishes_work());
    }

    #[tokio::test]
    async fn test_unbound_database_is_configuration_error() {
        let mut f = fixture().await;
        f.tenant.database_id = None;

        let err = f.pass.run(&f.tenant).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_out_of_range_window_stops_pass() {
        let mut f = fixture().await;
        f.tenant.time_min_days = Some(i64::MAX);

        let err = f.pass.run(&f.tenant).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert_eq!(err.code, "invalid_sync_window");
        assert!(err.finishes_work());
    }

    #[tokio::test]
    async fn test_transient_listing_failure_asks_for_retry() {
        let f = fixture().await;
        f.providers.calendar.fail_on(
            "list_events",
            ClientError::Status {
                status: 503,
                body: "unavailable".into(),
            },
        );

        let err = f.pass.run(&f.tenant).await.unwrap_err();
        assert_eq!(err.remediation, Remediation::Retry);
        assert!(err.is_api());
    }

    #[tokio::test]
    async fn test_vanished_page_is_ignored() {
        let f = fixture().await;
        let event = f.providers.calendar.seed_event("primary", &event_draft("Standup"));
        f.pass.run(&f.tenant).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        f.providers
            .calendar
            .patch_event("primary", &event.id, &event_draft("Standup v2"))
            .await
            .unwrap();
        f.providers.documents.fail_on("update_page", not_found());

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.ignored.len(), 1);
        assert_eq!(summary.ignored[0].remediation, Remediation::Ignore);
        assert_eq!(summary.ignored[0].severity, Severity::Warn);
    }

    #[tokio::test]
    async fn test_edited_page_patches_event() {
        let f = fixture().await;
        let page = f.providers.documents.seed_page(&page_draft("Review", "Work"));
        f.pass.run(&f.tenant).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        f.providers
            .documents
            .edit_page(&page.id, |p| p.title = "Review (moved)".into());

        let summary = f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(summary.events_updated, 1);
        assert_eq!(f.providers.calendar.events("primary")[0].summary, "Review (moved)");
    }
    #[tokio::test(start_paused = true)]
    async fn test_hanging_call_stops_pass_with_timeout() {
        let f = fixture().await;
        f.providers
            .calendar
            .stall_on("list_events", Duration::from_secs(600));

        let err = f.pass.run(&f.tenant).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.remediation, Remediation::Stop);
        assert!(err.finishes_work());
    }

    #[test]
    fn test_timeout_is_stop_but_transport_is_retry() {
        let tenant_id = Uuid::now_v7();
        let timeout = upstream(ClientError::Timeout(60_000), SourceSystem::Notion, tenant_id);
        assert_eq!(timeout.kind, ErrorKind::Timeout);
        assert_eq!(timeout.remediation, Remediation::Stop);

        let transport = upstream(
            ClientError::Transport("reset".into()),
            SourceSystem::Notion,
            tenant_id,
        );
        assert_eq!(transport.remediation, Remediation::Retry);
    }

    #[tokio::test]
    async fn test_archived_page_missing_from_query_removes_event() {
        let f = fixture().await;
        let page = f.providers.documents.seed_page(&page_draft("Review", "Work"));
        f.pass.run(&f.tenant).await.unwrap();
        assert_eq!(f.providers.calendar.event_count(), 1);

        f.providers.documents.edit_page(&page.id, |p| p.archived = true);
        let summary = f.pass.run(&f.tenant).await.unwrap();

        assert_eq!(summary.links_marked, 1);
        assert_eq!(summary.links_removed, 1);
        assert_eq!(f.store.link_count(), 0);
        assert_eq!(f.providers.calendar.event_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_page_removes_event() {
        let f = fixture().await;
        let page = f.providers.documents.seed_page(&page_draft("Review", "Work"));
        f.pass.run(&f.tenant).await.unwrap();

        f.providers.documents.remove_page(&page.id);
        let summary = f.pass.run(&f.tenant).await.unwrap();

        assert_eq!(summary.links_removed, 1);
        assert_eq!(f.store.link_count(), 0);
        assert_eq!(f.providers.calendar.event_count(), 0);
    }

    #[tokio::test]
    async fn test_live_page_outside_window_is_kept() {
        let f = fixture().await;
        let page = f.providers.documents.seed_page(&page_draft("Review", "Work"));
        f.pass.run(&f.tenant).await.unwrap();

        let far = Utc::now() + chrono::Duration::days(400);
        f.providers.documents.edit_page(&page.id, |p| {
            p.start = Some(far);
            p.end = Some(far + chrono::Duration::hours(1));
        });
        let summary = f.pass.run(&f.tenant).await.unwrap();

        assert_eq!(summary.links_marked, 0);
        assert_eq!(f.store.link_count(), 1);
        assert_eq!(f.providers.calendar.event_count(), 1);
    }
}
