//! Integration tests for the task execution coordinator.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use hr_sync::automation::{Automation, AutomationError, TaskAction};
use hr_sync::coordinator::{BatchReport, TaskExecutionCoordinator};
use hr_sync::models::automation_task::{TaskKind, TaskStatus};
use hr_sync::records::{EmployeeRecord, HrSystem, LeaveRecord};
use hr_sync::repositories::SyncStore;
use tempfile::TempDir;
use test_utils::{FakeAutomation, date, setup_test_store};
use uuid::Uuid;

struct Fixture {
    store: Arc<dyn SyncStore>,
    automation: Arc<FakeAutomation>,
    coordinator: TaskExecutionCoordinator,
    upload_dir: TempDir,
    job_id: Uuid,
}

async fn fixture() -> Result<Fixture> {
    let store = setup_test_store().await?;
    let automation = FakeAutomation::new();
    let upload_dir = TempDir::new()?;
    let coordinator = TaskExecutionCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&automation) as Arc<dyn Automation>,
        upload_dir.path(),
    );
    let job_id = store.save_job("tests").await?.id;

    Ok(Fixture {
        store,
        automation,
        coordinator,
        upload_dir,
        job_id,
    })
}

fn add(id: &str) -> TaskAction {
    TaskAction::AddEmployee(EmployeeRecord::new(id).with_name("ANA SOUZA"))
}

#[tokio::test]
async fn executes_pending_task_and_refreshes_cache() -> Result<()> {
    let f = fixture().await?;
    let task = f.store.save_automation_task(f.job_id, &add("000001")).await?;

    assert!(f.coordinator.execute_task(task.id).await?);

    let task = f.coordinator.get_task(task.id).await?.unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert!(task.started_at.is_some());
    assert!(task.finished_at.is_some());
    assert_eq!(task.retry_count, 0);
    assert_eq!(f.automation.applied(), vec!["add_employee:000001"]);

    let cached = f.store.get_cached_employees(HrSystem::Timekeeping).await?;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].name.as_deref(), Some("ANA SOUZA"));

    let logs = f.coordinator.get_task_logs(task.id).await?;
    assert!(logs.iter().all(|log| log.task_id == Some(task.id)));
    assert!(logs.iter().any(|log| log.message == "Task completed successfully"));
    // Task lines stay out of the job log.
    assert!(f.store.get_job_logs(f.job_id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn succeeded_running_and_unknown_tasks_are_not_executed() -> Result<()> {
    let f = fixture().await?;
    let done = f.store.save_automation_task(f.job_id, &add("000001")).await?;
    assert!(f.coordinator.execute_task(done.id).await?);

    let running = f.store.save_automation_task(f.job_id, &add("000002")).await?;
    f.store
        .update_task_status(running.id, TaskStatus::Running, None)
        .await?;

    assert!(!f.coordinator.execute_task(done.id).await?);
    assert!(!f.coordinator.execute_task(running.id).await?);
    assert!(!f.coordinator.execute_task(Uuid::new_v4()).await?);
    assert_eq!(f.automation.applied().len(), 1);

    Ok(())
}

#[tokio::test]
async fn failed_task_records_error_and_counts_reexecution() -> Result<()> {
    let f = fixture().await?;
    let task = f.store.save_automation_task(f.job_id, &add("000001")).await?;

    f.automation
        .fail_actions(Some(AutomationError::rejected("CPF already registered")));
    assert!(f.coordinator.execute_task(task.id).await?);
    let failed = f.coordinator.get_task(task.id).await?.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(
        failed
            .error_message
            .as_deref()
            .unwrap()
            .contains("CPF already registered")
    );
    assert!(
        f.store
            .get_cached_employees(HrSystem::Timekeeping)
            .await?
            .is_empty()
    );

    f.automation.fail_actions(None);
    assert!(f.coordinator.execute_task(task.id).await?);
    let retried = f.coordinator.get_task(task.id).await?.unwrap();
    assert_eq!(retried.status, TaskStatus::Success);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.error_message.is_none());

    Ok(())
}

#[tokio::test]
async fn leave_task_goes_through_upload_file() -> Result<()> {
    let f = fixture().await?;
    let leave = LeaveRecord::new("42", "10", date(2024, 3, 4), date(2024, 3, 6));
    let task = f
        .store
        .save_automation_task(f.job_id, &TaskAction::AddLeave(leave))
        .await?;

    assert!(f.coordinator.execute_task(task.id).await?);

    let uploaded = f.automation.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert!(uploaded[0].starts_with("000042,"));
    // The upload file is removed once the import went through.
    assert_eq!(std::fs::read_dir(f.upload_dir.path())?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn rejected_leave_upload_file_is_removed() -> Result<()> {
    let f = fixture().await?;
    let leave = LeaveRecord::new("42", "10", date(2024, 3, 4), date(2024, 3, 6));
    let task = f
        .store
        .save_automation_task(f.job_id, &TaskAction::AddLeave(leave))
        .await?;

    f.automation
        .fail_actions(Some(AutomationError::rejected("invalid leave code")));
    assert!(f.coordinator.execute_task(task.id).await?);

    let failed = f.store.get_task(task.id).await?.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(std::fs::read_dir(f.upload_dir.path())?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn batch_runs_pending_and_failed_tasks_of_one_kind() -> Result<()> {
    let f = fixture().await?;
    let first = f.store.save_automation_task(f.job_id, &add("000001")).await?;
    let second = f.store.save_automation_task(f.job_id, &add("000002")).await?;
    let done = f.store.save_automation_task(f.job_id, &add("000003")).await?;
    let removal = f
        .store
        .save_automation_task(
            f.job_id,
            &TaskAction::RemoveEmployee(
                EmployeeRecord::new("000004").with_dismissal_date(date(2024, 1, 1)),
            ),
        )
        .await?;

    f.store
        .update_task_status(second.id, TaskStatus::Failed, Some("timeout".into()))
        .await?;
    f.store
        .update_task_status(done.id, TaskStatus::Success, None)
        .await?;

    let report = f
        .coordinator
        .execute_batch(f.job_id, TaskKind::AddEmployee)
        .await?;
    assert_eq!(
        report,
        BatchReport {
            total: 2,
            succeeded: 2,
            failed: 0,
            skipped: 0,
        }
    );

    for id in [first.id, second.id] {
        let task = f.store.get_task(id).await?.unwrap();
        assert_eq!(task.status, TaskStatus::Success);
    }
    let removal = f.store.get_task(removal.id).await?.unwrap();
    assert_eq!(removal.status, TaskStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn batch_reports_failures() -> Result<()> {
    let f = fixture().await?;
    for id in ["000001", "000002"] {
        f.store.save_automation_task(f.job_id, &add(id)).await?;
    }
    f.automation
        .fail_actions(Some(AutomationError::transient("session expired")));

    let report = f
        .coordinator
        .execute_batch(f.job_id, TaskKind::AddEmployee)
        .await?;
    assert_eq!(report.total, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.succeeded, 0);

    Ok(())
}

#[tokio::test]
async fn cancel_only_applies_to_pending_or_running_tasks() -> Result<()> {
    let f = fixture().await?;
    let pending = f.store.save_automation_task(f.job_id, &add("000001")).await?;
    let done = f.store.save_automation_task(f.job_id, &add("000002")).await?;
    f.store
        .update_task_status(done.id, TaskStatus::Success, None)
        .await?;

    assert!(f.coordinator.cancel_task(pending.id).await?);
    assert!(!f.coordinator.cancel_task(done.id).await?);
    assert!(!f.coordinator.cancel_task(Uuid::new_v4()).await?);

    let cancelled = f.store.get_task(pending.id).await?.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.finished_at.is_some());

    // Cancelled tasks can be executed again on request.
    assert!(f.coordinator.execute_task(pending.id).await?);
    let rerun = f.store.get_task(pending.id).await?.unwrap();
    assert_eq!(rerun.status, TaskStatus::Success);

    Ok(())
}

#[tokio::test]
async fn cancelled_running_task_keeps_cancelled_status() -> Result<()> {
    let f = fixture().await?;
    let task = f.store.save_automation_task(f.job_id, &add("000001")).await?;
    assert!(f.store.try_start_task(task.id).await?);

    assert!(f.coordinator.cancel_task(task.id).await?);
    assert!(
        !f.store
            .finish_task(task.id, TaskStatus::Success, None)
            .await?
    );
    let task = f.store.get_task(task.id).await?.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    Ok(())
}

#[tokio::test]
async fn cancel_batch_counts_cancelled_tasks() -> Result<()> {
    let f = fixture().await?;
    for id in ["000001", "000002", "000003"] {
        f.store.save_automation_task(f.job_id, &add(id)).await?;
    }
    let tasks = f.coordinator.tasks_for_job(f.job_id).await?;
    f.store
        .update_task_status(tasks[0].id, TaskStatus::Failed, Some("x".into()))
        .await?;

    let cancelled = f
        .coordinator
        .cancel_batch(f.job_id, TaskKind::AddEmployee)
        .await?;
    assert_eq!(cancelled, 2);
    assert_eq!(
        f.coordinator
            .list_tasks(Some(TaskStatus::Cancelled))
            .await?
            .len(),
        2
    );

    Ok(())
}
