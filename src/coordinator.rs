//! Task Execution Coordinator
//!
//! Executes the automation tasks generated by sync jobs, one at a time or as a
//! sequential batch per job and kind, and cancels them on request.

use std::path::PathBuf;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::automation::{Automation, TaskAction, run_blocking};
use crate::error::SyncError;
use crate::models::automation_task::{Model as AutomationTask, TaskKind, TaskStatus};
use crate::models::sync_log::{LogLevel, Model as SyncLog};
use crate::records::HrSystem;
use crate::repositories::SyncStore;

const CANCEL_MESSAGE: &str = "Task cancelled by operator";

/// Result of [`TaskExecutionCoordinator::execute_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Tasks eligible when the batch started
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks claimed by someone else or cancelled before their turn
    pub skipped: usize,
}

pub struct TaskExecutionCoordinator {
    store: Arc<dyn SyncStore>,
    automation: Arc<dyn Automation>,
    upload_dir: PathBuf,
}

impl TaskExecutionCoordinator {
    pub fn new(
        store: Arc<dyn SyncStore>,
        automation: Arc<dyn Automation>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            automation,
            upload_dir: upload_dir.into(),
        }
    }

    /// Executes one task against the timekeeping system.
    ///
    /// Returns false without side effects when the task does not exist, is
    /// already running or already succeeded, or when another caller claimed
    /// it first. Returns true once the task reached a final status.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn execute_task(&self, task_id: Uuid) -> Result<bool, SyncError> {
        let Some(task) = self.store.get_task(task_id).await? else {
            debug!("Task not found");
            return Ok(false);
        };
        if matches!(task.status, TaskStatus::Success | TaskStatus::Running) {
            debug!(status = ?task.status, "Task not executable");
            return Ok(false);
        }
        if !self.store.try_start_task(task_id).await? {
            debug!("Task claimed by another executor");
            return Ok(false);
        }

        info!(job_id = %task.job_id, kind = task.kind.as_str(), "Executing automation task");
        self.log(&task, LogLevel::Info, &format!("Executing {} task", task.kind.as_str()))
            .await;

        let result = match TaskAction::from_parts(&task.kind, &task.payload) {
            Ok(action) => self.dispatch(task_id, action).await,
            Err(err) => Err(SyncError::from(err)),
        };

        let (status, message) = match &result {
            Ok(()) => (TaskStatus::Success, None),
            Err(err) => (TaskStatus::Failed, Some(err.to_string())),
        };
        let recorded = self.store.finish_task(task_id, status, message).await?;

        let metric_labels = vec![
            ("kind", task.kind.as_str().to_string()),
            ("status", if result.is_ok() { "success" } else { "failed" }.to_string()),
        ];
        counter!("automation_tasks_executed_total", &metric_labels).increment(1);

        match result {
            Ok(()) if recorded => {
                info!("Automation task succeeded");
                self.log(&task, LogLevel::Info, "Task completed successfully")
                    .await;
            }
            Ok(()) => {
                warn!("Automation task finished after being cancelled");
                self.log(
                    &task,
                    LogLevel::Warning,
                    "Task finished after cancellation; status left as cancelled",
                )
                .await;
            }
            Err(err) => {
                error!(error = %err, "Automation task failed");
                self.log(&task, LogLevel::Error, &format!("Task failed: {err}"))
                    .await;
            }
        }

        Ok(true)
    }

    /// Runs the action on the blocking pool and, when it went through,
    /// mirrors the resulting employee row into the timekeeping cache.
    async fn dispatch(&self, task_id: Uuid, action: TaskAction) -> Result<(), SyncError> {
        let upload_dir = self.upload_dir.clone();
        let action = Arc::new(action);
        let worker_action = Arc::clone(&action);

        run_blocking(&self.automation, move |driver| {
            worker_action.dispatch(driver, &upload_dir, task_id)
        })
        .await?;

        if let Some(employee) = action.resulting_employee()
            && let Err(err) = self
                .store
                .save_cached_employees_batch(HrSystem::Timekeeping, std::slice::from_ref(employee))
                .await
        {
            warn!(task_id = %task_id, error = %err, "Failed to refresh timekeeping cache");
        }
        Ok(())
    }

    /// Executes the Pending and Failed tasks of one job and kind, one after
    /// another in creation order.
    #[instrument(skip(self), fields(job_id = %job_id, kind = kind.as_str()))]
    pub async fn execute_batch(
        &self,
        job_id: Uuid,
        kind: TaskKind,
    ) -> Result<BatchReport, SyncError> {
        let tasks = self
            .store
            .get_tasks_by_job_and_kind(
                job_id,
                kind,
                &[TaskStatus::Pending, TaskStatus::Failed],
            )
            .await?;

        let mut report = BatchReport {
            total: tasks.len(),
            ..BatchReport::default()
        };

        for task in tasks {
            if !self.execute_task(task.id).await? {
                report.skipped += 1;
                continue;
            }
            match self.store.get_task(task.id).await?.map(|task| task.status) {
                Some(TaskStatus::Success) => report.succeeded += 1,
                Some(TaskStatus::Failed) => report.failed += 1,
                _ => report.skipped += 1,
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Task batch finished"
        );
        Ok(report)
    }

    /// Cancels a Pending or Running task.
    ///
    /// A running automation call is not interrupted; its final write is
    /// discarded because the task is no longer Running.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<bool, SyncError> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(false);
        };
        if !self.store.cancel_task(task_id, CANCEL_MESSAGE).await? {
            debug!(task_id = %task_id, status = ?task.status, "Task not cancellable");
            return Ok(false);
        }

        warn!(task_id = %task_id, job_id = %task.job_id, "Automation task cancelled");
        self.log(&task, LogLevel::Warning, CANCEL_MESSAGE).await;
        Ok(true)
    }

    /// Cancels every Pending or Running task of one job and kind.
    pub async fn cancel_batch(&self, job_id: Uuid, kind: TaskKind) -> Result<usize, SyncError> {
        let tasks = self
            .store
            .get_tasks_by_job_and_kind(
                job_id,
                kind,
                &[TaskStatus::Pending, TaskStatus::Running],
            )
            .await?;

        let mut cancelled = 0;
        for task in tasks {
            if self.cancel_task(task.id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<AutomationTask>, SyncError> {
        self.store.get_task(task_id).await
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<AutomationTask>, SyncError> {
        self.store.get_all_tasks(status).await
    }

    pub async fn tasks_for_job(&self, job_id: Uuid) -> Result<Vec<AutomationTask>, SyncError> {
        self.store.get_tasks_by_job(job_id).await
    }

    pub async fn get_task_logs(&self, task_id: Uuid) -> Result<Vec<SyncLog>, SyncError> {
        self.store.get_task_logs(task_id).await
    }

    async fn log(&self, task: &AutomationTask, level: LogLevel, message: &str) {
        if let Err(err) = self
            .store
            .add_log(task.job_id, level, message, Some(task.id))
            .await
        {
            warn!(task_id = %task.id, error = %err, "Failed to persist task log");
        }
    }
}
