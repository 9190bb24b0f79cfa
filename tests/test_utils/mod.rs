//! Test utilities for database and automation testing.
//!
//! This module provides an in-memory SQLite database with migrations applied
//! and a scripted [`Automation`] driver.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use hr_sync::automation::{Automation, AutomationError, TaskAction};
use hr_sync::error::SyncError;
use hr_sync::models::automation_task::{Model as TaskModel, TaskKind, TaskStatus};
use hr_sync::models::sync_job::{Model as JobModel, SyncJobStatus};
use hr_sync::models::sync_log::{LogLevel, Model as LogModel};
use hr_sync::orchestrator::{OrchestratorConfig, SyncOrchestrator};
use hr_sync::reconciliation::WatchedField;
use hr_sync::records::{EmployeeRecord, HrSystem, LeaveRecord};
use hr_sync::registry::TaskRegistry;
use hr_sync::repositories::{DatabaseStore, SyncStore};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// # Returns
///
/// Returns a Result containing the database connection
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;

    // Task and log fixtures do not always have a parent job row.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Sets up a [`DatabaseStore`] over a fresh in-memory database.
pub async fn setup_test_store() -> Result<Arc<dyn SyncStore>> {
    let (_, store) = setup_test_db_and_store().await?;
    Ok(store)
}

/// Like [`setup_test_store`], also returning the connection for raw SQL.
pub async fn setup_test_db_and_store() -> Result<(DatabaseConnection, Arc<dyn SyncStore>)> {
    let db = setup_test_db().await?;
    let store: Arc<dyn SyncStore> = Arc::new(DatabaseStore::new(db.clone()));
    Ok((db, store))
}

/// Orchestrator config without credential checks or download pauses.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        download_attempts: 1,
        download_retry_delay: Duration::ZERO,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator(
    store: &Arc<dyn SyncStore>,
    automation: &Arc<FakeAutomation>,
    config: OrchestratorConfig,
) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        Arc::clone(store),
        Arc::clone(automation) as Arc<dyn Automation>,
        Arc::new(TaskRegistry::default()),
        config,
    ))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Polls `condition` every 10ms for up to two seconds.
pub async fn wait_until<F, Fut>(condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    wait_until_within(Duration::from_secs(2), condition).await
}

/// Polls `condition` every 10ms until it holds or `limit` elapsed.
pub async fn wait_until_within<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let attempts = (limit.as_millis() / 10).max(1);
    for _ in 0..attempts {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted automation driver.
///
/// Downloads return the configured tables, optionally after a delay or a
/// queue of failures. Actions are recorded as `kind:id` strings.
#[derive(Default)]
pub struct FakeAutomation {
    payroll: Mutex<Vec<EmployeeRecord>>,
    timekeeping: Mutex<Vec<EmployeeRecord>>,
    leaves: Mutex<Vec<LeaveRecord>>,
    download_delay: Mutex<Duration>,
    download_failures: Mutex<VecDeque<AutomationError>>,
    persistent_download_failure: Mutex<Option<AutomationError>>,
    action_failure: Mutex<Option<AutomationError>>,
    applied: Mutex<Vec<String>>,
    uploaded: Mutex<Vec<String>>,
    download_calls: AtomicUsize,
}

impl FakeAutomation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_payroll(&self, records: Vec<EmployeeRecord>) {
        *lock(&self.payroll) = records;
    }

    pub fn set_timekeeping(&self, records: Vec<EmployeeRecord>) {
        *lock(&self.timekeeping) = records;
    }

    pub fn set_leaves(&self, leaves: Vec<LeaveRecord>) {
        *lock(&self.leaves) = leaves;
    }

    pub fn set_download_delay(&self, delay: Duration) {
        *lock(&self.download_delay) = delay;
    }

    /// The next download calls fail with these errors, one each.
    pub fn queue_download_failures(&self, errors: Vec<AutomationError>) {
        lock(&self.download_failures).extend(errors);
    }

    pub fn fail_downloads(&self, error: Option<AutomationError>) {
        *lock(&self.persistent_download_failure) = error;
    }

    pub fn fail_actions(&self, error: Option<AutomationError>) {
        *lock(&self.action_failure) = error;
    }

    pub fn applied(&self) -> Vec<String> {
        lock(&self.applied).clone()
    }

    /// Contents of every leave upload file seen by `add_leave`.
    pub fn uploaded(&self) -> Vec<String> {
        lock(&self.uploaded).clone()
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn before_download(&self) -> Result<(), AutomationError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.download_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if let Some(err) = lock(&self.download_failures).pop_front() {
            return Err(err);
        }
        match lock(&self.persistent_download_failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply(&self, entry: String) -> Result<(), AutomationError> {
        if let Some(err) = lock(&self.action_failure).clone() {
            return Err(err);
        }
        lock(&self.applied).push(entry);
        Ok(())
    }
}

impl Automation for FakeAutomation {
    fn download_employees(&self, system: HrSystem) -> Result<Vec<EmployeeRecord>, AutomationError> {
        self.before_download()?;
        Ok(match system {
            HrSystem::Payroll => lock(&self.payroll).clone(),
            HrSystem::Timekeeping => lock(&self.timekeeping).clone(),
        })
    }

    fn download_leaves(&self, _since: NaiveDate) -> Result<Vec<LeaveRecord>, AutomationError> {
        self.before_download()?;
        Ok(lock(&self.leaves).clone())
    }

    fn add_employee(&self, record: &EmployeeRecord) -> Result<(), AutomationError> {
        self.apply(format!("add_employee:{}", record.id))
    }

    fn update_employee(
        &self,
        record: &EmployeeRecord,
        _changed_fields: &[WatchedField],
    ) -> Result<(), AutomationError> {
        self.apply(format!("update_employee:{}", record.id))
    }

    fn remove_employee(&self, record: &EmployeeRecord) -> Result<(), AutomationError> {
        self.apply(format!("remove_employee:{}", record.id))
    }

    fn add_leave(&self, upload_file: &Path) -> Result<(), AutomationError> {
        let contents = fs::read_to_string(upload_file)
            .map_err(|err| AutomationError::rejected(err.to_string()))?;
        self.apply(format!("add_leave:{}", contents.trim()))?;
        lock(&self.uploaded).push(contents);
        Ok(())
    }
}

/// [`SyncStore`] wrapper whose retry polling fails a scripted number of times
/// before reaching the wrapped store.
pub struct FlakyStore {
    inner: Arc<dyn SyncStore>,
    ready_for_retry_failures: AtomicUsize,
    ready_for_retry_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn SyncStore>, ready_for_retry_failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ready_for_retry_failures: AtomicUsize::new(ready_for_retry_failures),
            ready_for_retry_calls: AtomicUsize::new(0),
        })
    }

    pub fn ready_for_retry_calls(&self) -> usize {
        self.ready_for_retry_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncStore for FlakyStore {
    async fn save_job(&self, triggered_by: &str) -> Result<JobModel, SyncError> {
        self.inner.save_job(triggered_by).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobModel>, SyncError> {
        self.inner.get_job(job_id).await
    }

    async fn list_jobs(&self) -> Result<Vec<JobModel>, SyncError> {
        self.inner.list_jobs().await
    }

    async fn list_jobs_with_status(
        &self,
        status: SyncJobStatus,
    ) -> Result<Vec<JobModel>, SyncError> {
        self.inner.list_jobs_with_status(status).await
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<JobModel, SyncError> {
        self.inner.update_job_status(job_id, status, message).await
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: SyncJobStatus,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        self.inner
            .transition_job(job_id, expected, status, message)
            .await
    }

    async fn increment_job_retry(
        &self,
        job_id: Uuid,
        next_retry_at: DateTime<Utc>,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        self.inner
            .increment_job_retry(job_id, next_retry_at, message)
            .await
    }

    async fn get_jobs_ready_for_retry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobModel>, SyncError> {
        self.ready_for_retry_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .ready_for_retry_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Io(std::io::Error::other("database unavailable")));
        }
        self.inner.get_jobs_ready_for_retry(now).await
    }

    async fn update_job_metadata(
        &self,
        job_id: Uuid,
        metadata: JsonValue,
    ) -> Result<(), SyncError> {
        self.inner.update_job_metadata(job_id, metadata).await
    }

    async fn add_log(
        &self,
        job_id: Uuid,
        level: LogLevel,
        message: &str,
        task_id: Option<Uuid>,
    ) -> Result<(), SyncError> {
        self.inner.add_log(job_id, level, message, task_id).await
    }

    async fn get_job_logs(&self, job_id: Uuid) -> Result<Vec<LogModel>, SyncError> {
        self.inner.get_job_logs(job_id).await
    }

    async fn get_task_logs(&self, task_id: Uuid) -> Result<Vec<LogModel>, SyncError> {
        self.inner.get_task_logs(task_id).await
    }

    async fn save_automation_task(
        &self,
        job_id: Uuid,
        action: &TaskAction,
    ) -> Result<TaskModel, SyncError> {
        self.inner.save_automation_task(job_id, action).await
    }

    async fn save_automation_tasks_batch(
        &self,
        job_id: Uuid,
        actions: &[TaskAction],
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.inner.save_automation_tasks_batch(job_id, actions).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskModel>, SyncError> {
        self.inner.get_task(task_id).await
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskModel, SyncError> {
        self.inner.update_task_status(task_id, status, message).await
    }

    async fn try_start_task(&self, task_id: Uuid) -> Result<bool, SyncError> {
        self.inner.try_start_task(task_id).await
    }

    async fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        self.inner.finish_task(task_id, status, message).await
    }

    async fn cancel_task(&self, task_id: Uuid, message: &str) -> Result<bool, SyncError> {
        self.inner.cancel_task(task_id, message).await
    }

    async fn get_tasks_by_job(&self, job_id: Uuid) -> Result<Vec<TaskModel>, SyncError> {
        self.inner.get_tasks_by_job(job_id).await
    }

    async fn get_tasks_by_job_and_kind(
        &self,
        job_id: Uuid,
        kind: TaskKind,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.inner
            .get_tasks_by_job_and_kind(job_id, kind, statuses)
            .await
    }

    async fn get_all_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.inner.get_all_tasks(status).await
    }

    async fn get_cached_employees(
        &self,
        system: HrSystem,
    ) -> Result<Vec<EmployeeRecord>, SyncError> {
        self.inner.get_cached_employees(system).await
    }

    async fn save_cached_employees_batch(
        &self,
        system: HrSystem,
        records: &[EmployeeRecord],
    ) -> Result<u64, SyncError> {
        self.inner.save_cached_employees_batch(system, records).await
    }

    async fn get_cached_leaves(&self) -> Result<Vec<LeaveRecord>, SyncError> {
        self.inner.get_cached_leaves().await
    }

    async fn save_cached_leaves_batch(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError> {
        self.inner.save_cached_leaves_batch(leaves).await
    }

    async fn replace_cached_leaves(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError> {
        self.inner.replace_cached_leaves(leaves).await
    }

    async fn commit_pass(
        &self,
        job_id: Uuid,
        actions: &[TaskAction],
        leave_snapshot: Option<&[LeaveRecord]>,
        metadata: JsonValue,
    ) -> Result<Vec<TaskModel>, SyncError> {
        self.inner
            .commit_pass(job_id, actions, leave_snapshot, metadata)
            .await
    }
}
