//! Sync Orchestrator
//!
//! Drives one sync job end to end: download both employee tables and the
//! leave export, refresh the record cache, reconcile, persist the generated
//! automation tasks and settle the job status. Failures go through the job
//! level retry policy; kills and zombie recovery live here as well.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, Months, NaiveDate, Utc};
use metrics::{counter, histogram};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::automation::{Automation, AutomationError, run_blocking};
use crate::config::AppConfig;
use crate::error::SyncError;
use crate::models::sync_job::{Model as SyncJob, SyncJobStatus};
use crate::models::sync_log::{LogLevel, Model as SyncLog};
use crate::reconciliation::{
    LeaveCodeTable, ReconciliationInput, ReconciliationSummary, index_by_id, reconcile,
};
use crate::records::{EmployeeRecord, HrSystem, LeaveRecord};
use crate::registry::{JobHandle, TaskRegistry};
use crate::repositories::SyncStore;

/// Delays before the first, second and third job level retry.
pub const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(5 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(2 * 60 * 60),
];

pub const KILL_MESSAGE: &str = "Termination requested by operator";
const ZOMBIE_MESSAGE: &str = "Job was running without an active worker and has been cancelled";
const CANCELLED_MESSAGE: &str = "Sync job cancelled";

/// Backoff before the next job level retry, `None` once the budget is spent.
pub fn retry_backoff(retry_count: i32) -> Option<Duration> {
    usize::try_from(retry_count)
        .ok()
        .and_then(|index| RETRY_BACKOFF.get(index).copied())
}

/// First day of the month `months_ago` months before `today`.
fn leaves_since(today: NaiveDate, months_ago: u32) -> NaiveDate {
    let first_of_month = today.with_day(1).unwrap_or(today);
    first_of_month
        .checked_sub_months(Months::new(months_ago))
        .unwrap_or(first_of_month)
}

/// Configuration for the sync orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Run the three downloads concurrently instead of one after another
    pub concurrent_downloads: bool,
    /// Attempts per download before the job level retry takes over
    pub download_attempts: u32,
    /// Fixed pause between download attempts
    pub download_retry_delay: Duration,
    /// Leaves are exported from the first day of the month this many months back
    pub leaves_months_ago: u32,
    /// Names of required credentials that are not configured
    pub missing_credentials: Vec<String>,
    pub leave_codes: Option<LeaveCodeTable>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrent_downloads: true,
            download_attempts: 3,
            download_retry_delay: Duration::from_secs(2),
            leaves_months_ago: 2,
            missing_credentials: Vec::new(),
            leave_codes: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            concurrent_downloads: config.concurrent_downloads,
            download_attempts: config.download_attempts,
            download_retry_delay: Duration::from_millis(config.download_retry_delay_ms),
            leaves_months_ago: config.leaves_months_ago,
            missing_credentials: config
                .credentials
                .missing()
                .into_iter()
                .map(str::to_string)
                .collect(),
            leave_codes: config.leave_code_table(),
        }
    }
}

/// How a call to [`SyncOrchestrator::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success(ReconciliationSummary),
    Retrying {
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    },
    Failed(String),
    Cancelled,
    /// The job exists but was not in a startable state.
    Skipped(SyncJobStatus),
    NotFound,
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Success(_) => "success",
            JobOutcome::Retrying { .. } => "retrying",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::Skipped(_) => "skipped",
            JobOutcome::NotFound => "not_found",
        }
    }
}

struct Downloads {
    payroll_employees: Vec<EmployeeRecord>,
    leaves: Vec<LeaveRecord>,
    timekeeping_employees: Vec<EmployeeRecord>,
}

/// Runs sync jobs and owns their status transitions
pub struct SyncOrchestrator {
    store: Arc<dyn SyncStore>,
    automation: Arc<dyn Automation>,
    registry: Arc<TaskRegistry>,
    config: OrchestratorConfig,
    status_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn SyncStore>,
        automation: Arc<dyn Automation>,
        registry: Arc<TaskRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            automation,
            registry,
            config,
            status_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub async fn create_job(&self, triggered_by: &str) -> Result<SyncJob, SyncError> {
        self.store.save_job(triggered_by).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<SyncJob>, SyncError> {
        self.store.get_job(job_id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<SyncJob>, SyncError> {
        self.store.list_jobs().await
    }

    pub async fn get_job_logs(&self, job_id: Uuid) -> Result<Vec<SyncLog>, SyncError> {
        self.store.get_job_logs(job_id).await
    }

    /// Runs the job on a new tokio task.
    pub fn spawn(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<JobOutcome> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run(job_id).await })
    }

    /// Runs one job to completion. Never returns an error: every failure is
    /// logged against the job and reflected in its status.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) -> JobOutcome {
        let token = CancellationToken::new();
        let job = match self.start(job_id, &token).await {
            Ok(Ok(job)) => job,
            Ok(Err(outcome)) => return outcome,
            Err(err) => {
                error!(error = %err, "Failed to start sync job");
                return JobOutcome::Failed(err.to_string());
            }
        };

        let registry = Arc::clone(&self.registry);
        let _unregister = scopeguard::guard(job_id, move |job_id| {
            registry.unregister(job_id);
        });

        let started = Instant::now();
        info!(retry_count = job.retry_count, "Sync job started");
        self.log(job_id, LogLevel::Info, "Sync job started").await;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SyncError::Cancelled),
            result = self.execute(job_id) => result,
        };

        let outcome = self.settle(&job, result).await;

        histogram!("sync_job_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        let metric_labels = vec![("status", outcome.label().to_string())];
        counter!("sync_jobs_finished_total", &metric_labels).increment(1);

        outcome
    }

    /// Moves a startable job to Running and registers its handle.
    async fn start(
        &self,
        job_id: Uuid,
        token: &CancellationToken,
    ) -> Result<Result<SyncJob, JobOutcome>, SyncError> {
        let _lock = self.status_lock.lock().await;

        let Some(job) = self.store.get_job(job_id).await? else {
            warn!("Sync job not found");
            return Ok(Err(JobOutcome::NotFound));
        };
        if !job.status.is_startable() {
            info!(status = ?job.status, "Sync job is not startable; skipping");
            return Ok(Err(JobOutcome::Skipped(job.status)));
        }
        if !self
            .store
            .transition_job(job_id, job.status, SyncJobStatus::Running, None)
            .await?
        {
            return Ok(Err(JobOutcome::Skipped(job.status)));
        }

        self.registry.register(job_id, JobHandle::new(token.clone()));
        Ok(Ok(job))
    }

    async fn execute(&self, job_id: Uuid) -> Result<ReconciliationSummary, SyncError> {
        self.validate_configuration()?;

        let downloads = self.download_all(job_id).await?;

        let payroll: Vec<EmployeeRecord> =
            index_by_id(&downloads.payroll_employees, HrSystem::Payroll)?
                .into_values()
                .collect();
        let downloaded_timekeeping: Vec<EmployeeRecord> =
            index_by_id(&downloads.timekeeping_employees, HrSystem::Timekeeping)?
                .into_values()
                .collect();

        self.store
            .save_cached_employees_batch(HrSystem::Payroll, &payroll)
            .await?;
        self.store
            .save_cached_employees_batch(HrSystem::Timekeeping, &downloaded_timekeeping)
            .await?;
        let timekeeping = self.store.get_cached_employees(HrSystem::Timekeeping).await?;
        let previous_leaves = self.store.get_cached_leaves().await?;

        let output = reconcile(&ReconciliationInput {
            payroll_employees: &payroll,
            timekeeping_employees: &timekeeping,
            previous_leaves: &previous_leaves,
            current_leaves: &downloads.leaves,
            leave_codes: self.config.leave_codes.as_ref(),
            today: Local::now().date_naive(),
        })?;
        let summary = output.summary();

        let actions = output.actions();
        let leave_snapshot = if payroll.is_empty() {
            warn!("Payroll export is empty; keeping previous leave snapshot");
            None
        } else {
            Some(output.leave_snapshot.as_slice())
        };
        let metadata = json!({
            "summary": summary,
            "tasks_created": actions.len(),
            "downloaded": {
                "payroll_employees": downloads.payroll_employees.len(),
                "timekeeping_employees": downloads.timekeeping_employees.len(),
                "leaves": downloads.leaves.len(),
            },
        });

        self.store
            .commit_pass(job_id, &actions, leave_snapshot, metadata)
            .await?;
        for action in &actions {
            let metric_labels = vec![("kind", action.kind().as_str().to_string())];
            counter!("sync_tasks_generated_total", &metric_labels).increment(1);
        }

        Ok(summary)
    }

    fn validate_configuration(&self) -> Result<(), SyncError> {
        if self.config.missing_credentials.is_empty() {
            return Ok(());
        }
        Err(SyncError::validation(format!(
            "missing required credentials: {}",
            self.config.missing_credentials.join(", ")
        )))
    }

    async fn download_all(&self, job_id: Uuid) -> Result<Downloads, SyncError> {
        let since = leaves_since(Local::now().date_naive(), self.config.leaves_months_ago);

        let payroll = self.download(job_id, "payroll employees", move |driver| {
            driver.download_employees(HrSystem::Payroll)
        });
        let leaves = self.download(job_id, "payroll leaves", move |driver| {
            driver.download_leaves(since)
        });
        let timekeeping = self.download(job_id, "timekeeping employees", move |driver| {
            driver.download_employees(HrSystem::Timekeeping)
        });

        let (payroll_employees, leaves, timekeeping_employees) =
            if self.config.concurrent_downloads {
                tokio::try_join!(payroll, leaves, timekeeping)?
            } else {
                (payroll.await?, leaves.await?, timekeeping.await?)
            };

        Ok(Downloads {
            payroll_employees,
            leaves,
            timekeeping_employees,
        })
    }

    /// One download with its own bounded retry. Only transient automation
    /// failures are attempted again.
    async fn download<T, F>(&self, job_id: Uuid, what: &str, fetch: F) -> Result<T, SyncError>
    where
        F: Fn(&dyn Automation) -> Result<T, AutomationError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let attempts = self.config.download_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.log(
                job_id,
                LogLevel::Info,
                &format!("Downloading {what} (attempt {attempt}/{attempts})"),
            )
            .await;

            match run_blocking(&self.automation, fetch.clone()).await {
                Ok(rows) => {
                    debug!(what, attempt, "Download finished");
                    return Ok(rows);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(error = %err, what, attempt, "Download failed; retrying");
                    self.log(
                        job_id,
                        LogLevel::Warning,
                        &format!("Download of {what} failed on attempt {attempt}: {err}"),
                    )
                    .await;
                    sleep(self.config.download_retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Applies the final transition for a finished run.
    ///
    /// Every write is conditional on the job still being Running, so a kill
    /// that landed meanwhile keeps its Cancelled status.
    async fn settle(
        &self,
        job: &SyncJob,
        result: Result<ReconciliationSummary, SyncError>,
    ) -> JobOutcome {
        match self.try_settle(job, result).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "Failed to record sync job outcome");
                JobOutcome::Failed(err.to_string())
            }
        }
    }

    async fn try_settle(
        &self,
        job: &SyncJob,
        result: Result<ReconciliationSummary, SyncError>,
    ) -> Result<JobOutcome, SyncError> {
        let job_id = job.id;

        let err = match result {
            Ok(summary) => {
                let message = format!(
                    "Sync completed: {} new, {} dismissed, {} changed employees, {} new leaves",
                    summary.new_employees,
                    summary.dismissed_employees,
                    summary.changed_employees,
                    summary.new_leaves
                );
                let finished = {
                    let _lock = self.status_lock.lock().await;
                    self.store
                        .transition_job(
                            job_id,
                            SyncJobStatus::Running,
                            SyncJobStatus::Success,
                            Some(message.clone()),
                        )
                        .await?
                };
                if !finished {
                    return Ok(self.cancelled(job_id).await);
                }
                info!(tasks = summary.total(), "{message}");
                self.log(job_id, LogLevel::Info, &message).await;
                return Ok(JobOutcome::Success(summary));
            }
            Err(err) => err,
        };

        if err.is_cancelled() {
            let lock = self.status_lock.lock().await;
            self.store
                .transition_job(
                    job_id,
                    SyncJobStatus::Running,
                    SyncJobStatus::Cancelled,
                    Some(CANCELLED_MESSAGE.to_string()),
                )
                .await?;
            drop(lock);
            return Ok(self.cancelled(job_id).await);
        }

        error!(error = %err, retry_count = job.retry_count, "Sync job failed");
        self.log(job_id, LogLevel::Error, &format!("Sync job failed: {err}"))
            .await;

        let backoff = retry_backoff(job.retry_count).filter(|_| err.is_retryable());
        let lock = self.status_lock.lock().await;

        match backoff {
            Some(delay) => {
                let next_retry_at = Utc::now() + delay;
                let scheduled = self
                    .store
                    .increment_job_retry(job_id, next_retry_at, Some(err.to_string()))
                    .await?;
                drop(lock);
                if !scheduled {
                    return Ok(self.cancelled(job_id).await);
                }
                let retry_count = job.retry_count + 1;
                info!(retry_count, next_retry_at = %next_retry_at, "Sync job scheduled for retry");
                self.log(
                    job_id,
                    LogLevel::Info,
                    &format!("Retry {retry_count} scheduled for {}", next_retry_at.to_rfc3339()),
                )
                .await;
                Ok(JobOutcome::Retrying {
                    retry_count,
                    next_retry_at,
                })
            }
            None => {
                let message = if err.is_retryable() {
                    format!("retry budget exhausted: {err}")
                } else {
                    err.to_string()
                };
                let failed = self
                    .store
                    .transition_job(
                        job_id,
                        SyncJobStatus::Running,
                        SyncJobStatus::Failed,
                        Some(message.clone()),
                    )
                    .await?;
                drop(lock);
                if !failed {
                    return Ok(self.cancelled(job_id).await);
                }
                Ok(JobOutcome::Failed(message))
            }
        }
    }

    async fn cancelled(&self, job_id: Uuid) -> JobOutcome {
        warn!(job_id = %job_id, "Sync job cancelled");
        self.log(job_id, LogLevel::Warning, CANCELLED_MESSAGE).await;
        JobOutcome::Cancelled
    }

    /// Cancels a running job.
    ///
    /// The Cancelled status is written before the job's token fires. A
    /// Running job without registered handle is a zombie and is only marked.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn kill(&self, job_id: Uuid) -> Result<bool, SyncError> {
        let lock = self.status_lock.lock().await;

        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(false);
        };
        if job.status != SyncJobStatus::Running {
            debug!(status = ?job.status, "Job is not running; nothing to kill");
            return Ok(false);
        }
        if !self
            .store
            .transition_job(
                job_id,
                SyncJobStatus::Running,
                SyncJobStatus::Cancelled,
                Some(KILL_MESSAGE.to_string()),
            )
            .await?
        {
            return Ok(false);
        }
        drop(lock);

        self.log(job_id, LogLevel::Warning, KILL_MESSAGE).await;
        match self.registry.get(job_id) {
            Some(handle) => {
                handle.token.cancel();
                warn!("Sync job killed");
            }
            None => warn!("Killed job had no active worker; treated as already stopped"),
        }

        Ok(true)
    }

    /// Kills every registered job, then every Running job left without a
    /// handle. Returns the number of distinct jobs stopped.
    pub async fn kill_all(&self) -> Result<usize, SyncError> {
        let mut killed = HashSet::new();

        for (job_id, _) in self.registry.get_all() {
            if self.kill(job_id).await? {
                killed.insert(job_id);
            }
        }

        for job in self
            .store
            .list_jobs_with_status(SyncJobStatus::Running)
            .await?
        {
            if killed.contains(&job.id) {
                continue;
            }
            if self.kill(job.id).await? {
                killed.insert(job.id);
            }
        }

        info!(killed = killed.len(), "Kill-all completed");
        Ok(killed.len())
    }

    /// Cancels Running jobs that have no worker in this process, typically
    /// left behind by a crash. Returns how many were resolved.
    pub async fn recover_zombies(&self) -> Result<usize, SyncError> {
        let mut recovered = 0;

        for job in self
            .store
            .list_jobs_with_status(SyncJobStatus::Running)
            .await?
        {
            if self.registry.contains(job.id) {
                continue;
            }

            let resolved = {
                let _lock = self.status_lock.lock().await;
                self.store
                    .transition_job(
                        job.id,
                        SyncJobStatus::Running,
                        SyncJobStatus::Cancelled,
                        Some(ZOMBIE_MESSAGE.to_string()),
                    )
                    .await?
            };
            if resolved {
                warn!(job_id = %job.id, "Recovered zombie sync job");
                self.log(job.id, LogLevel::Warning, ZOMBIE_MESSAGE).await;
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    /// Appends a job log line. Log persistence failures never fail the job.
    async fn log(&self, job_id: Uuid, level: LogLevel, message: &str) {
        if let Err(err) = self.store.add_log(job_id, level, message, None).await {
            warn!(job_id = %job_id, error = %err, "Failed to persist job log");
        }
    }
}
