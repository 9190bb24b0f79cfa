//! Integration tests for the retry scheduler.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use hr_sync::config::RetrySchedulerConfig;
use hr_sync::models::sync_job::SyncJobStatus;
use hr_sync::repositories::SyncStore;
use hr_sync::scheduler::RetryScheduler;
use test_utils::{
    FakeAutomation, FlakyStore, fast_config, orchestrator, setup_test_store, wait_until,
    wait_until_within,
};

fn scheduler_config() -> RetrySchedulerConfig {
    RetrySchedulerConfig {
        poll_interval_seconds: 1,
        shutdown_timeout_seconds: 1,
    }
}

#[tokio::test]
async fn tick_dispatches_only_due_retries() -> Result<()> {
    let store = setup_test_store().await?;
    let automation = FakeAutomation::new();
    automation.set_payroll(vec![hr_sync::records::EmployeeRecord::new("1")]);
    let orchestrator = orchestrator(&store, &automation, fast_config());
    let scheduler = RetryScheduler::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        scheduler_config(),
    );

    let due = store.save_job("tests").await?;
    store
        .update_job_status(due.id, SyncJobStatus::Running, None)
        .await?;
    assert!(
        store
            .increment_job_retry(due.id, Utc::now() - ChronoDuration::seconds(1), None)
            .await?
    );

    let later = store.save_job("tests").await?;
    store
        .update_job_status(later.id, SyncJobStatus::Running, None)
        .await?;
    store
        .increment_job_retry(later.id, Utc::now() + ChronoDuration::minutes(5), None)
        .await?;

    assert_eq!(scheduler.tick().await?, 1);

    let store_ref = &store;
    let due_id = due.id;
    assert!(
        wait_until(|| async move {
            store_ref
                .get_job(due_id)
                .await
                .ok()
                .flatten()
                .is_some_and(|job| job.status == SyncJobStatus::Success)
        })
        .await
    );
    let later = store.get_job(later.id).await?.unwrap();
    assert_eq!(later.status, SyncJobStatus::Retrying);

    assert_eq!(scheduler.tick().await?, 0);

    Ok(())
}

#[tokio::test]
async fn start_and_stop_are_idempotent() -> Result<()> {
    let store = setup_test_store().await?;
    let automation = FakeAutomation::new();
    let orchestrator = orchestrator(&store, &automation, fast_config());
    let scheduler = Arc::new(RetryScheduler::new(
        Arc::clone(&store),
        orchestrator,
        scheduler_config(),
    ));

    assert!(!scheduler.is_running());
    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.is_running());

    assert!(scheduler.stop().await);
    assert!(!scheduler.stop().await);
    assert!(!scheduler.is_running());

    // Restart after a stop.
    assert!(scheduler.start());
    assert!(scheduler.stop().await);

    Ok(())
}

#[tokio::test]
async fn loop_survives_failed_tick_and_dispatches_due_job() -> Result<()> {
    let inner = setup_test_store().await?;
    let flaky = FlakyStore::new(Arc::clone(&inner), 1);
    let store: Arc<dyn SyncStore> = flaky.clone();
    let automation = FakeAutomation::new();
    automation.set_payroll(vec![hr_sync::records::EmployeeRecord::new("1")]);
    let orchestrator = orchestrator(&store, &automation, fast_config());
    let scheduler = Arc::new(RetryScheduler::new(
        Arc::clone(&store),
        orchestrator,
        scheduler_config(),
    ));

    let job = store.save_job("tests").await?;
    store
        .update_job_status(job.id, SyncJobStatus::Running, None)
        .await?;
    assert!(
        store
            .increment_job_retry(job.id, Utc::now() - ChronoDuration::seconds(1), None)
            .await?
    );

    assert!(scheduler.start());

    // The first poll fails; the loop keeps going.
    let flaky_ref = &flaky;
    assert!(
        wait_until_within(Duration::from_secs(5), || async move {
            flaky_ref.ready_for_retry_calls() >= 1
        })
        .await
    );
    assert!(scheduler.is_running());

    let store_ref = &store;
    let job_id = job.id;
    assert!(
        wait_until_within(Duration::from_secs(10), || async move {
            store_ref
                .get_job(job_id)
                .await
                .ok()
                .flatten()
                .is_some_and(|job| job.status == SyncJobStatus::Success)
        })
        .await
    );
    assert!(flaky.ready_for_retry_calls() >= 2);
    assert!(scheduler.is_running());

    assert!(scheduler.stop().await);

    Ok(())
}
