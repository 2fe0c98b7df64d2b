//! Tiered loop scheduler with graceful drain

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use calsync_core::PlanTier;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::sync_loop::{LoopDeps, SyncLoop};
use crate::context::{InstanceContext, ReportCounters, WorkerPoolContext};
use crate::persistence::SyncStore;
use crate::reconcile::PassRunner;

/// Default pause when no tenant is due.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(5000);

/// Loop timing and retry bounds
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Pause after each pass, per tier
    pub cooldowns: BTreeMap<PlanTier, Duration>,

    /// Pause when nothing is due
    pub idle_interval: Duration,

    /// Upper bound of the random extra added to `idle_interval`
    pub idle_jitter: Duration,

    /// Tenants synced more recently are not claimed
    pub min_sync_interval: Duration,

    /// Pass attempts per claim when the pass asks for a retry
    pub max_pass_retries: u32,

    /// Added to the pass timeout to form the claim lease
    pub lease_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cooldowns = PlanTier::ALL
            .iter()
            .map(|tier| {
                let ms = match tier {
                    PlanTier::Free => 5000,
                    _ => 1000,
                };
                (*tier, Duration::from_millis(ms))
            })
            .collect();
        Self {
            cooldowns,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            idle_jitter: Duration::from_millis(500),
            min_sync_interval: Duration::from_secs(300),
            max_pass_retries: 3,
            lease_grace: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn cooldown(&self, tier: PlanTier) -> Duration {
        self.cooldowns
            .get(&tier)
            .copied()
            .unwrap_or(Duration::from_millis(1000))
    }

    pub fn with_cooldown(mut self, tier: PlanTier, cooldown: Duration) -> Self {
        self.cooldowns.insert(tier, cooldown);
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration, jitter: Duration) -> Self {
        self.idle_interval = interval;
        self.idle_jitter = jitter;
        self
    }

    pub fn with_min_sync_interval(mut self, interval: Duration) -> Self {
        self.min_sync_interval = interval;
        self
    }

    pub fn with_max_pass_retries(mut self, retries: u32) -> Self {
        self.max_pass_retries = retries.max(1);
        self
    }
}

/// Scheduler errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Loops were already started
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// Loops still running at the drain deadline were aborted
    #[error("graceful shutdown timed out, {aborted} loop(s) aborted")]
    ShutdownTimeout { aborted: usize },
}

/// Runs `workers[tier]` loops per plan tier against the shared store
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new(store, runner, instance, pool, report, SchedulerConfig::default());
/// scheduler.start()?;
///
/// // ... later
/// scheduler.shutdown(Duration::from_secs(60)).await?;
/// ```
pub struct Scheduler {
    deps: Arc<LoopDeps>,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn SyncStore>,
        runner: Arc<dyn PassRunner>,
        instance: Arc<InstanceContext>,
        pool: Arc<WorkerPoolContext>,
        report: Arc<ReportCounters>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            deps: Arc::new(LoopDeps {
                store,
                runner,
                instance,
                pool,
                report,
                config,
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn every loop. Returns the number started.
    #[instrument(skip(self), fields(prefix = %self.deps.instance.prefix()))]
    pub fn start(&self) -> Result<usize, SchedulerError> {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return Err(SchedulerError::AlreadyRunning);
        }

        for (tier, count) in self.deps.instance.workers() {
            for n in 0..*count {
                let loop_id = format!("{}-{}-{}", self.deps.instance.prefix(), tier, n);
                let sync_loop = SyncLoop::new(loop_id.clone(), *tier, self.deps.clone());
                handles.push((loop_id, tokio::spawn(sync_loop.run())));
            }
        }

        info!(loops = handles.len(), "Scheduler started");
        Ok(handles.len())
    }

    /// Loops spawned and not yet finished.
    pub fn running_loops(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .count()
    }

    /// Stop claiming, let in-flight passes finish, abort whatever is left at `max_wait`.
    #[instrument(skip(self), fields(prefix = %self.deps.instance.prefix()))]
    pub async fn shutdown(&self, max_wait: Duration) -> Result<(), SchedulerError> {
        self.deps.instance.request_stop();
        info!(max_wait_ms = max_wait.as_millis() as u64, "Draining loops");

        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let remaining = self.running_loops();
            if remaining == 0 {
                debug!("All loops finished");
                self.handles.lock().clear();
                info!("Scheduler stopped");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                let mut aborted = 0;
                for (loop_id, handle) in self.handles.lock().drain(..) {
                    if !handle.is_finished() {
                        handle.abort();
                        self.deps.pool.deregister(&loop_id);
                        aborted += 1;
                    }
                }
                warn!(aborted, "Shutdown timeout reached, loops aborted");
                return Err(SchedulerError::ShutdownTimeout { aborted });
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
