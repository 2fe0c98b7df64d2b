//! End-to-end sync flows against the in-memory store and fake providers
//!
//! Run with: cargo test -p calsync-engine --test sync_flow_test

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use calsync_core::{
    AccessRole, Calendar, CalendarStatus, EventDraft, PageDraft, PlanTier, Tenant,
};
use calsync_engine::fakes::{FakeCalendar, FakeDocuments, FakeProviders};
use calsync_engine::{
    ClaimRequest, InMemorySyncStore, InstanceContext, PassRunner, PassSettings, ReconcilePass,
    ReportCounters, Scheduler, SchedulerConfig, SyncStore, WorkerPoolContext,
};
use chrono::Utc;

struct World {
    store: Arc<InMemorySyncStore>,
    providers: FakeProviders,
    tenant: Tenant,
}

async fn world() -> World {
    let store = Arc::new(InMemorySyncStore::new());
    let calendar = FakeCalendar::new();
    calendar.add_calendar("primary", AccessRole::Owner);
    calendar.add_calendar("team", AccessRole::Writer);
    let providers = FakeProviders::new(calendar, FakeDocuments::with_database("db-1", &["Me", "Team"]));

    let mut tenant = Tenant::new(PlanTier::Pro);
    tenant.database_id = Some("db-1".into());
    store.insert_tenant(&tenant).await.unwrap();

    store
        .insert_calendar(
            &Calendar::new(tenant.id, "primary", "Me")
                .with_status(CalendarStatus::Connected)
                .with_primary(true),
        )
        .await
        .unwrap();
    store
        .insert_calendar(&Calendar::new(tenant.id, "team", "Team").with_status(CalendarStatus::Connected))
        .await
        .unwrap();

    World {
        store,
        providers,
        tenant,
    }
}

fn pass(world: &World) -> ReconcilePass {
    ReconcilePass::new(
        world.store.clone(),
        Arc::new(world.providers.clone()),
        PassSettings::default(),
    )
}

fn event(summary: &str, days_ahead: i64) -> EventDraft {
    let start = Utc::now() + chrono::Duration::days(days_ahead);
    EventDraft {
        summary: summary.into(),
        description: Some("synced".into()),
        start,
        end: start + chrono::Duration::minutes(30),
        all_day: false,
    }
}

fn page(title: &str, binding: Option<&str>) -> PageDraft {
    let start = Utc::now() + chrono::Duration::days(3);
    PageDraft {
        title: title.into(),
        calendar_property: binding.unwrap_or_default().into(),
        description: None,
        start,
        end: start + chrono::Duration::hours(2),
        all_day: false,
    }
}

#[tokio::test]
async fn test_unlinked_event_yields_one_page_and_one_link() {
    let w = world().await;
    let seeded = w.providers.calendar.seed_event("team", &event("Planning", 1));

    pass(&w).run(&w.tenant).await.unwrap();

    let pages = w.providers.documents.pages();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].title, "Planning");
    assert_eq!(pages[0].calendar_property.as_deref(), Some("Team"));

    let links = w.store.links_for(w.tenant.id);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].calendar_event_id.as_deref(), Some(seeded.id.as_str()));
    assert_eq!(links[0].page_id.as_deref(), Some(pages[0].id.as_str()));
    assert!(links[0].is_synced());
}

#[tokio::test]
async fn test_page_without_binding_lands_on_primary() {
    let w = world().await;
    w.providers.documents.seed_page(&page("Dentist", None));

    pass(&w).run(&w.tenant).await.unwrap();

    assert_eq!(w.providers.calendar.events("primary").len(), 1);
    assert!(w.providers.calendar.events("team").is_empty());
}

#[tokio::test]
async fn test_repeated_passes_are_stable() {
    let w = world().await;
    w.providers.calendar.seed_event("primary", &event("One", 1));
    w.providers.calendar.seed_event("team", &event("Two", 2));
    w.providers.documents.seed_page(&page("Three", Some("Team")));

    let runner = pass(&w);
    for _ in 0..3 {
        runner.run(&w.tenant).await.unwrap();
    }

    assert_eq!(w.store.link_count(), 3);
    assert_eq!(w.providers.calendar.event_count(), 3);
    assert_eq!(w.providers.documents.live_page_count(), 3);
}

#[tokio::test]
async fn test_archived_page_removes_event() {
    let w = world().await;
    let seeded = w.providers.documents.seed_page(&page("Offsite", Some("Team")));
    let runner = pass(&w);
    runner.run(&w.tenant).await.unwrap();
    assert_eq!(w.providers.calendar.events("team").len(), 1);

    w.providers.documents.edit_page(&seeded.id, |p| p.archived = true);
    let summary = runner.run(&w.tenant).await.unwrap();

    assert_eq!(summary.links_removed, 1);
    assert!(w.providers.calendar.events("team").is_empty());
    assert_eq!(w.store.link_count(), 0);

    // Removals are consumed once
    assert!(w.store.pending_removals(w.tenant.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_claim_within_lease_is_rejected_for_other_loop() {
    let w = world().await;
    let lease = Duration::from_secs(120);

    let claimed = w
        .store
        .claim_next_tenant(ClaimRequest {
            owner: "a-pro-0",
            tier: PlanTier::Pro,
            lease,
            min_interval: Duration::from_secs(300),
        })
        .await
        .unwrap()
        .expect("tenant is due");
    assert_eq!(claimed.id, w.tenant.id);

    assert!(w.store.claim_tenant(w.tenant.id, "b-pro-0", lease).await.unwrap().is_none());
    assert!(w
        .store
        .claim_next_tenant(ClaimRequest {
            owner: "b-pro-0",
            tier: PlanTier::Pro,
            lease,
            min_interval: Duration::from_secs(300),
        })
        .await
        .unwrap()
        .is_none());

    w.store.release_tenant(w.tenant.id, "a-pro-0").await.unwrap();
    assert!(w.store.claim_tenant(w.tenant.id, "b-pro-0", lease).await.unwrap().is_some());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_scheduler_syncs_then_drains() {
    let w = world().await;
    w.providers.calendar.seed_event("primary", &event("Standup", 1));

    let workers = BTreeMap::from([(PlanTier::Pro, 2), (PlanTier::Free, 1)]);
    let instance = Arc::new(InstanceContext::new("it", "0.0.0", workers, Duration::from_secs(60)));
    let pool = Arc::new(WorkerPoolContext::new());
    let report = Arc::new(ReportCounters::new());
    let runner: Arc<dyn PassRunner> = Arc::new(pass(&w));

    let scheduler = Scheduler::new(
        w.store.clone(),
        runner,
        instance.clone(),
        pool.clone(),
        report.clone(),
        SchedulerConfig::default().with_idle_interval(Duration::from_millis(100), Duration::ZERO),
    );
    assert_eq!(scheduler.start().unwrap(), 3);

    for _ in 0..500 {
        if report.snapshot().success_count >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(report.snapshot().success_count, 1);

    scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(pool.is_empty());
    assert_eq!(w.store.link_count(), 1);
    assert_eq!(w.providers.documents.live_page_count(), 1);

    let tenant = w.store.get_tenant(w.tenant.id).await.unwrap();
    assert!(tenant.claimed_by.is_none());
}
