//! # Repository Layer
//!
//! Repository implementations encapsulating SeaORM operations per table, and
//! the [`SyncStore`] contract the orchestrator, scheduler and coordinator are
//! written against. [`DatabaseStore`] implements the contract on top of the
//! per-table repositories.

pub mod automation_task;
pub mod record_cache;
pub mod sync_job;
pub mod sync_log;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub use automation_task::AutomationTaskRepository;
pub use record_cache::RecordCacheRepository;
pub use sync_job::SyncJobRepository;
pub use sync_log::SyncLogRepository;

use crate::automation::TaskAction;
use crate::error::{SyncError, map_db_err};
use crate::models::automation_task::{Model as TaskModel, TaskKind, TaskStatus};
use crate::models::sync_job::{Model as JobModel, SyncJobStatus};
use crate::models::sync_log::{LogLevel, Model as LogModel};
use crate::records::{EmployeeRecord, HrSystem, LeaveRecord};

/// Persistence contract of the sync engine.
///
/// Status writes maintain the timestamp invariants: `started_at` is set when
/// entering Running, `finished_at` is set exactly when the status is terminal,
/// and `next_retry_at` is only kept while Retrying.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // Jobs

    /// Creates a pending job.
    async fn save_job(&self, triggered_by: &str) -> Result<JobModel, SyncError>;
    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobModel>, SyncError>;
    /// Newest first.
    async fn list_jobs(&self) -> Result<Vec<JobModel>, SyncError>;
    async fn list_jobs_with_status(
        &self,
        status: SyncJobStatus,
    ) -> Result<Vec<JobModel>, SyncError>;
    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<JobModel, SyncError>;
    /// Compare-and-set status write; returns whether the job was in `expected`.
    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: SyncJobStatus,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError>;
    /// Running to Retrying with `retry_count + 1` and the given retry time.
    async fn increment_job_retry(
        &self,
        job_id: Uuid,
        next_retry_at: DateTime<Utc>,
        message: Option<String>,
    ) -> Result<bool, SyncError>;
    async fn get_jobs_ready_for_retry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobModel>, SyncError>;
    async fn update_job_metadata(&self, job_id: Uuid, metadata: JsonValue)
    -> Result<(), SyncError>;

    // Logs

    async fn add_log(
        &self,
        job_id: Uuid,
        level: LogLevel,
        message: &str,
        task_id: Option<Uuid>,
    ) -> Result<(), SyncError>;
    async fn get_job_logs(&self, job_id: Uuid) -> Result<Vec<LogModel>, SyncError>;
    async fn get_task_logs(&self, task_id: Uuid) -> Result<Vec<LogModel>, SyncError>;

    // Tasks

    async fn save_automation_task(
        &self,
        job_id: Uuid,
        action: &TaskAction,
    ) -> Result<TaskModel, SyncError>;
    /// All or nothing.
    async fn save_automation_tasks_batch(
        &self,
        job_id: Uuid,
        actions: &[TaskAction],
    ) -> Result<Vec<TaskModel>, SyncError>;
    async fn get_task(&self, task_id: Uuid)
    -> Result<Option<TaskModel>, SyncError>;
    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskModel, SyncError>;
    /// Atomic claim; false when the task is missing, running or already succeeded.
    async fn try_start_task(&self, task_id: Uuid) -> Result<bool, SyncError>;
    /// Final write applied only while the task is still Running.
    async fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError>;
    /// Pending or Running to Cancelled.
    async fn cancel_task(&self, task_id: Uuid, message: &str) -> Result<bool, SyncError>;
    async fn get_tasks_by_job(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<TaskModel>, SyncError>;
    async fn get_tasks_by_job_and_kind(
        &self,
        job_id: Uuid,
        kind: TaskKind,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskModel>, SyncError>;
    /// Newest first.
    async fn get_all_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskModel>, SyncError>;

    // Record cache

    async fn get_cached_employees(
        &self,
        system: HrSystem,
    ) -> Result<Vec<EmployeeRecord>, SyncError>;
    async fn save_cached_employees_batch(
        &self,
        system: HrSystem,
        records: &[EmployeeRecord],
    ) -> Result<u64, SyncError>;
    async fn get_cached_leaves(&self) -> Result<Vec<LeaveRecord>, SyncError>;
    async fn save_cached_leaves_batch(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError>;
    async fn replace_cached_leaves(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError>;

    // Passes

    /// Persists the result of one reconciliation pass in a single
    /// transaction: the job metadata, the task batch and, when given, the new
    /// leave snapshot. Nothing is stored when any write fails. Fails with
    /// [`SyncError::Cancelled`] when the job is no longer Running.
    async fn commit_pass(
        &self,
        job_id: Uuid,
        actions: &[TaskAction],
        leave_snapshot: Option<&[LeaveRecord]>,
        metadata: JsonValue,
    ) -> Result<Vec<TaskModel>, SyncError>;
}

/// [`SyncStore`] backed by a SeaORM connection.
#[derive(Debug, Clone)]
pub struct DatabaseStore {
    db: DatabaseConnection,
    jobs: SyncJobRepository,
    logs: SyncLogRepository,
    tasks: AutomationTaskRepository,
    cache: RecordCacheRepository,
}

impl DatabaseStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            jobs: SyncJobRepository::new(db.clone()),
            logs: SyncLogRepository::new(db.clone()),
            tasks: AutomationTaskRepository::new(db.clone()),
            cache: RecordCacheRepository::new(db.clone()),
            db,
        }
    }

    async fn write_pass(
        txn: &DatabaseTransaction,
        job_id: Uuid,
        actions: &[TaskAction],
        leave_snapshot: Option<&[LeaveRecord]>,
        metadata: JsonValue,
    ) -> Result<Vec<TaskModel>, SyncError> {
        if !SyncJobRepository::record_running_metadata(txn, job_id, metadata).await? {
            return Err(SyncError::Cancelled);
        }
        let tasks = AutomationTaskRepository::insert_all(txn, job_id, actions).await?;
        if let Some(leaves) = leave_snapshot {
            RecordCacheRepository::write_leave_snapshot(txn, leaves).await?;
        }
        Ok(tasks)
    }
}

#[async_trait]
impl SyncStore for DatabaseStore {
    async fn save_job(&self, triggered_by: &str) -> Result<JobModel, SyncError> {
        self.jobs.create(triggered_by).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobModel>, SyncError> {
        self.jobs.find(job_id).await
    }

    async fn list_jobs(&self) -> Result<Vec<JobModel>, SyncError> {
        self.jobs.list().await
    }

    async fn list_jobs_with_status(
        &self,
        status: SyncJobStatus,
    ) -> Result<Vec<JobModel>, SyncError> {
        self.jobs.list_with_status(status).await
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<JobModel, SyncError> {
        self.jobs.update_status(job_id, status, message).await
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: SyncJobStatus,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        self.jobs.transition(job_id, expected, status, message).await
    }

    async fn increment_job_retry(
        &self,
        job_id: Uuid,
        next_retry_at: DateTime<Utc>,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        self.jobs.schedule_retry(job_id, next_retry_at, message).await
    }

    async fn get_jobs_ready_for_retry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobModel>, SyncError> {
        self.jobs.ready_for_retry(now).await
    }

    async fn update_job_metadata(
        &self,
        job_id: Uuid,
        metadata: JsonValue,
    ) -> Result<(), SyncError> {
        self.jobs.update_metadata(job_id, metadata).await
    }

    async fn add_log(
        &self,
        job_id: Uuid,
        level: LogLevel,
        message: &str,
        task_id: Option<Uuid>,
    ) -> Result<(), SyncError> {
        self.logs.append(job_id, level, message, task_id).await?;
        Ok(())
    }

    async fn get_job_logs(&self, job_id: Uuid) -> Result<Vec<LogModel>, SyncError> {
        self.logs.for_job(job_id).await
    }

    async fn get_task_logs(&self, task_id: Uuid) -> Result<Vec<LogModel>, SyncError> {
        self.logs.for_task(task_id).await
    }

    async fn save_automation_task(
        &self,
        job_id: Uuid,
        action: &TaskAction,
    ) -> Result<TaskModel, SyncError> {
        self.tasks.create(job_id, action).await
    }

    async fn save_automation_tasks_batch(
        &self,
        job_id: Uuid,
        actions: &[TaskAction],
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.tasks.create_batch(job_id, actions).await
    }

    async fn get_task(
        &self,
        task_id: Uuid,
    ) -> Result<Option<TaskModel>, SyncError> {
        self.tasks.find(task_id).await
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskModel, SyncError> {
        self.tasks.update_status(task_id, status, message).await
    }

    async fn try_start_task(&self, task_id: Uuid) -> Result<bool, SyncError> {
        self.tasks.try_start(task_id).await
    }

    async fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        self.tasks.finish(task_id, status, message).await
    }

    async fn cancel_task(&self, task_id: Uuid, message: &str) -> Result<bool, SyncError> {
        self.tasks.cancel(task_id, message).await
    }

    async fn get_tasks_by_job(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.tasks.list_by_job(job_id).await
    }

    async fn get_tasks_by_job_and_kind(
        &self,
        job_id: Uuid,
        kind: TaskKind,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.tasks.list_by_job_and_kind(job_id, kind, statuses).await
    }

    async fn get_all_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.tasks.list(status).await
    }

    async fn get_cached_employees(
        &self,
        system: HrSystem,
    ) -> Result<Vec<EmployeeRecord>, SyncError> {
        self.cache.employees(system).await
    }

    async fn save_cached_employees_batch(
        &self,
        system: HrSystem,
        records: &[EmployeeRecord],
    ) -> Result<u64, SyncError> {
        self.cache.upsert_employees(system, records).await
    }

    async fn get_cached_leaves(&self) -> Result<Vec<LeaveRecord>, SyncError> {
        self.cache.leaves().await
    }

    async fn save_cached_leaves_batch(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError> {
        self.cache.insert_leaves(leaves).await
    }

    async fn replace_cached_leaves(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError> {
        self.cache.replace_leaves(leaves).await
    }

    async fn commit_pass(
        &self,
        job_id: Uuid,
        actions: &[TaskAction],
        leave_snapshot: Option<&[LeaveRecord]>,
        metadata: JsonValue,
    ) -> Result<Vec<TaskModel>, SyncError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| map_db_err("failed to open sync pass transaction", err))?;

        match Self::write_pass(&txn, job_id, actions, leave_snapshot, metadata).await {
            Ok(tasks) => {
                txn.commit()
                    .await
                    .map_err(|err| map_db_err("failed to commit sync pass", err))?;
                tracing::info!(job_id = %job_id, tasks = tasks.len(), "Sync pass committed");
                Ok(tasks)
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!(job_id = %job_id, error = %rollback, "Failed to roll back sync pass");
                }
                Err(err)
            }
        }
    }
}
