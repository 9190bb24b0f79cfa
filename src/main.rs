//! # HR Sync Main Entry Point
//!
//! Operator command line for the sync engine.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hr_sync::{
    automation::{Automation, UnconfiguredAutomation},
    config::{AppConfig, ConfigLoader},
    coordinator::TaskExecutionCoordinator,
    db,
    models::automation_task::{TaskKind, TaskStatus},
    orchestrator::{JobOutcome, OrchestratorConfig, SyncOrchestrator},
    registry::TaskRegistry,
    repositories::{DatabaseStore, SyncStore},
    scheduler::RetryScheduler,
    telemetry::init_tracing,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "hr-sync", about = "Payroll to timekeeping synchronization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the retry scheduler until interrupted
    Serve,
    /// Create a sync job and run it in the foreground
    Sync {
        #[arg(long, default_value = "cli")]
        triggered_by: String,
    },
    /// List sync jobs, newest first
    Jobs,
    /// Show the log lines of a job
    Logs { job_id: Uuid },
    /// Request termination of a running job
    Kill { job_id: Uuid },
    /// Request termination of every running job
    KillAll,
    /// List automation tasks
    Tasks {
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Execute one automation task
    Execute { task_id: Uuid },
    /// Execute the pending and failed tasks of a job and kind
    ExecuteBatch { job_id: Uuid, kind: TaskKind },
    /// Cancel one automation task
    Cancel { task_id: Uuid },
    /// Cancel the pending and running tasks of a job and kind
    CancelBatch { job_id: Uuid, kind: TaskKind },
}

struct Runtime {
    config: AppConfig,
    store: Arc<dyn SyncStore>,
    orchestrator: Arc<SyncOrchestrator>,
    coordinator: TaskExecutionCoordinator,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config).context("initializing telemetry")?;
    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted, "Loaded configuration");
    }

    let runtime = build_runtime(config).await?;
    match cli.command {
        Command::Serve => serve(&runtime).await,
        Command::Sync { triggered_by } => {
            let job = runtime.orchestrator.create_job(&triggered_by).await?;
            let outcome = runtime.orchestrator.run(job.id).await;
            print_json(&runtime.orchestrator.get_job(job.id).await?)?;
            match outcome {
                JobOutcome::Success(_) | JobOutcome::Retrying { .. } => Ok(()),
                other => bail!("sync job {} ended as {}", job.id, other.label()),
            }
        }
        Command::Jobs => print_json(&runtime.orchestrator.list_jobs().await?),
        Command::Logs { job_id } => print_json(&runtime.orchestrator.get_job_logs(job_id).await?),
        Command::Kill { job_id } => {
            if !runtime.orchestrator.kill(job_id).await? {
                bail!("job {job_id} is not running");
            }
            Ok(())
        }
        Command::KillAll => {
            let killed = runtime.orchestrator.kill_all().await?;
            println!("{killed} job(s) terminated");
            Ok(())
        }
        Command::Tasks { status } => print_json(&runtime.coordinator.list_tasks(status).await?),
        Command::Execute { task_id } => {
            if !runtime.coordinator.execute_task(task_id).await? {
                bail!("task {task_id} is not executable");
            }
            print_json(&runtime.coordinator.get_task(task_id).await?)
        }
        Command::ExecuteBatch { job_id, kind } => {
            print_json(&runtime.coordinator.execute_batch(job_id, kind).await?)
        }
        Command::Cancel { task_id } => {
            if !runtime.coordinator.cancel_task(task_id).await? {
                bail!("task {task_id} is not cancellable");
            }
            Ok(())
        }
        Command::CancelBatch { job_id, kind } => {
            let cancelled = runtime.coordinator.cancel_batch(job_id, kind).await?;
            println!("{cancelled} task(s) cancelled");
            Ok(())
        }
    }
}

async fn build_runtime(config: AppConfig) -> Result<Runtime> {
    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await?;

    let store: Arc<dyn SyncStore> = Arc::new(DatabaseStore::new(db));
    let automation: Arc<dyn Automation> = Arc::new(UnconfiguredAutomation);
    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&automation),
        Arc::new(TaskRegistry::default()),
        OrchestratorConfig::from_app_config(&config),
    ));
    let coordinator =
        TaskExecutionCoordinator::new(Arc::clone(&store), automation, config.upload_dir.clone());

    Ok(Runtime {
        config,
        store,
        orchestrator,
        coordinator,
    })
}

async fn serve(runtime: &Runtime) -> Result<()> {
    let recovered = runtime.orchestrator.recover_zombies().await?;
    if recovered > 0 {
        warn!(recovered, "Cancelled jobs left running by a previous process");
    }

    let scheduler = Arc::new(RetryScheduler::new(
        Arc::clone(&runtime.store),
        Arc::clone(&runtime.orchestrator),
        runtime.config.retry_scheduler.clone(),
    ));
    scheduler.start();
    info!("Sync engine running; press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    let killed = runtime.orchestrator.kill_all().await?;
    if killed > 0 {
        warn!(killed, "Terminated running jobs on shutdown");
    }
    scheduler.stop().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}
