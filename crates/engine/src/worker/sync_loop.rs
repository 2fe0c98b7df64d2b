//! One worker loop: claim, reconcile, cool down, repeat

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use calsync_core::{PlanTier, Remediation, SyncError, Tenant};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, instrument, warn};

use super::scheduler::SchedulerConfig;
use crate::context::{InstanceContext, ReportCounters, WorkerPoolContext};
use crate::persistence::{ClaimRequest, SyncStore};
use crate::reconcile::{PassRunner, PassSummary};
use crate::reliability::with_timeout;

/// Where a loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Claiming,
    Reconciling,
    Cooling,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Claiming => "claiming",
            LoopState::Reconciling => "reconciling",
            LoopState::Cooling => "cooling",
            LoopState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything a loop shares with its siblings.
pub(crate) struct LoopDeps {
    pub store: Arc<dyn SyncStore>,
    pub runner: Arc<dyn PassRunner>,
    pub instance: Arc<InstanceContext>,
    pub pool: Arc<WorkerPoolContext>,
    pub report: Arc<ReportCounters>,
    pub config: SchedulerConfig,
}

/// Aborts the spawned pass when the loop stops waiting for it.
struct PassTask(AbortHandle);

impl Drop for PassTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) struct SyncLoop {
    id: String,
    tier: PlanTier,
    deps: Arc<LoopDeps>,
}

impl SyncLoop {
    pub fn new(id: String, tier: PlanTier, deps: Arc<LoopDeps>) -> Self {
        Self { id, tier, deps }
    }

    #[instrument(skip(self), fields(loop_id = %self.id, tier = %self.tier))]
    pub async fn run(self) {
        self.deps.pool.register(&self.id, self.tier);
        let mut stop_rx = self.deps.instance.subscribe_stop();
        let mut state = LoopState::Idle;
        let mut claimed: Option<Tenant> = None;

        info!("Loop started");

        while state != LoopState::Stopped {
            let next = match state {
                LoopState::Idle => {
                    if self.deps.instance.is_stopped() {
                        LoopState::Stopped
                    } else {
                        LoopState::Claiming
                    }
                }
                LoopState::Claiming => match self.claim_next().await {
                    Some(tenant) => {
                        claimed = Some(tenant);
                        LoopState::Reconciling
                    }
                    None => {
                        if pause(&mut stop_rx, self.idle_delay()).await {
                            LoopState::Stopped
                        } else {
                            LoopState::Idle
                        }
                    }
                },
                LoopState::Reconciling => {
                    if let Some(tenant) = claimed.take() {
                        self.reconcile(tenant).await;
                    }
                    LoopState::Cooling
                }
                LoopState::Cooling => {
                    let cooldown = self.deps.config.cooldown(self.tier);
                    if pause(&mut stop_rx, cooldown).await {
                        LoopState::Stopped
                    } else {
                        LoopState::Idle
                    }
                }
                LoopState::Stopped => LoopState::Stopped,
            };
            if next != state {
                debug!(from = %state, to = %next, "Loop state");
            }
            state = next;
        }

        self.deps.pool.deregister(&self.id);
        info!("Loop stopped");
    }

    fn lease(&self) -> Duration {
        self.deps.instance.timeout() + self.deps.config.lease_grace
    }

    fn idle_delay(&self) -> Duration {
        let jitter_ms = self.deps.config.idle_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.deps.config.idle_interval + Duration::from_millis(jitter)
    }

    async fn claim_next(&self) -> Option<Tenant> {
        let request = ClaimRequest {
            owner: &self.id,
            tier: self.tier,
            lease: self.lease(),
            min_interval: self.deps.config.min_sync_interval,
        };
        match self.deps.store.claim_next_tenant(request).await {
            Ok(tenant) => tenant,
            Err(e) => {
                error!(error = %e, "Claim failed");
                None
            }
        }
    }

    /// Run passes for one claimed tenant until it succeeds or stops, then release it.
    async fn reconcile(&self, tenant: Tenant) {
        let tenant_id = tenant.id;
        self.deps.pool.claim(&self.id, tenant_id);
        info!(%tenant_id, "Tenant claimed");

        let mut tenant = tenant;
        let mut attempts = 0;
        let succeeded = loop {
            attempts += 1;
            self.deps.report.record_attempt();

            match self.run_pass(&tenant).await {
                Ok(summary) => {
                    for err in &summary.ignored {
                        self.persist(err).await;
                    }
                    break true;
                }
                Err(err)
                    if err.remediation == Remediation::Retry
                        && attempts < self.deps.config.max_pass_retries
                        && !self.deps.instance.is_stopped() =>
                {
                    warn!(%tenant_id, attempt = attempts, code = %err.code, "Pass failed, retrying");
                    self.persist(&err).await;
                    match self
                        .deps
                        .store
                        .claim_tenant(tenant_id, &self.id, self.lease())
                        .await
                    {
                        Ok(Some(renewed)) => tenant = renewed,
                        Ok(None) => {
                            warn!(%tenant_id, "Lease lost, abandoning tenant");
                            break false;
                        }
                        Err(e) => {
                            self.persist(&e.into_sync_error(tenant_id)).await;
                            break false;
                        }
                    }
                }
                Err(err) => {
                    let err = if err.remediation == Remediation::Retry {
                        err.with_remediation(Remediation::Stop)
                    } else {
                        err
                    };
                    error!(%tenant_id, code = %err.code, detail = %err.detail, "Pass failed");
                    self.persist(&err).await;
                    break false;
                }
            }
        };

        if succeeded {
            self.deps.report.record_success(tenant_id);
        } else {
            self.deps.report.record_failure();
        }

        if let Err(e) = self.deps.store.release_tenant(tenant_id, &self.id).await {
            error!(%tenant_id, error = %e, "Release failed");
        }
        self.deps.pool.finish(&self.id);
    }

    /// One pass on its own task, bounded by the instance timeout.
    async fn run_pass(&self, tenant: &Tenant) -> Result<PassSummary, SyncError> {
        let runner = self.deps.runner.clone();
        let owned = tenant.clone();
        let mut handle = tokio::spawn(async move { runner.run(&owned).await });
        let _task = PassTask(handle.abort_handle());

        let limit = self.deps.instance.timeout();
        match with_timeout(limit, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SyncError::unclassified(
                &anyhow::anyhow!("pass task failed: {join_err}"),
                tenant.id,
            )),
            Err(_) => Err(SyncError::timeout(
                format!("pass exceeded {}ms", limit.as_millis()),
                tenant.id,
            )),
        }
    }

    async fn persist(&self, err: &SyncError) {
        let record = err.to_log_record(self.deps.instance.prefix());
        if let Err(e) = self.deps.store.append_log(&record).await {
            error!(tenant_id = %err.tenant_id, error = %e, "Failed to persist sync error");
        }
    }
}

/// Sleep for `duration` unless stop is requested first. Returns true on stop.
async fn pause(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop_rx.borrow(),
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow(),
    }
}
