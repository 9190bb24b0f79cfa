//! # Retry Scheduler
//!
//! Background loop that re-enters the orchestrator for jobs waiting in
//! Retrying whose backoff elapsed. Dispatch is fire-and-forget: a tick never
//! waits for the jobs it starts, and the orchestrator's compare-and-set start
//! keeps a job from running twice when two ticks pick it up.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RetrySchedulerConfig;
use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;
use crate::repositories::SyncStore;

struct LoopHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct TickStats {
    jobs_due: u64,
    jobs_dispatched: u64,
}

/// Background retry scheduler service.
pub struct RetryScheduler {
    store: Arc<dyn SyncStore>,
    orchestrator: Arc<SyncOrchestrator>,
    config: RetrySchedulerConfig,
    running: Mutex<Option<LoopHandle>>,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<dyn SyncStore>,
        orchestrator: Arc<SyncOrchestrator>,
        config: RetrySchedulerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
            running: Mutex::new(None),
        }
    }

    /// Starts the polling loop. Returns false when it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            debug!("Retry scheduler already running");
            return false;
        }

        let shutdown = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let loop_shutdown = shutdown.clone();
        let task = tokio::spawn(async move { scheduler.run(loop_shutdown).await });

        *running = Some(LoopHandle { shutdown, task });
        true
    }

    /// Stops the polling loop, waiting at most the configured shutdown
    /// timeout before aborting it. Returns false when it was not running.
    pub async fn stop(&self) -> bool {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(LoopHandle { shutdown, mut task }) = handle else {
            return false;
        };

        shutdown.cancel();
        let grace = Duration::from_secs(self.config.shutdown_timeout_seconds);
        if timeout(grace, &mut task).await.is_err() {
            warn!(
                timeout_seconds = self.config.shutdown_timeout_seconds,
                "Retry scheduler did not stop in time; aborting"
            );
            task.abort();
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "Starting retry scheduler"
        );
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retry scheduler shutdown requested");
                    break;
                }
                _ = sleep(poll_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Retry scheduler tick failed");
                    }
                    let elapsed = tick_started.elapsed();
                    histogram!("retry_scheduler_tick_duration_ms")
                        .record(elapsed.as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Retry scheduler stopped");
    }

    /// Polls once and dispatches every job whose retry is due.
    ///
    /// Returns the number of jobs handed to the orchestrator.
    pub async fn tick(&self) -> Result<usize, SyncError> {
        let mut stats = TickStats::default();

        let due = self.store.get_jobs_ready_for_retry(Utc::now()).await?;
        stats.jobs_due = due.len() as u64;

        for job in due {
            debug!(job_id = %job.id, retry_count = job.retry_count, "Dispatching job retry");
            // Detached; the orchestrator records the outcome on the job itself.
            drop(self.orchestrator.spawn(job.id));
            stats.jobs_dispatched += 1;
        }

        counter!("retry_scheduler_jobs_dispatched_total").increment(stats.jobs_dispatched);

        debug!(
            due = stats.jobs_due,
            dispatched = stats.jobs_dispatched,
            "Retry scheduler tick completed"
        );

        Ok(stats.jobs_dispatched as usize)
    }
}
