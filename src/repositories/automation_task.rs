//! # AutomationTask Repository
//!
//! Persistence of generated automation tasks. Claims and final writes are
//! single conditional `UPDATE`s so two executors can never both run a task.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, UpdateMany,
};
use uuid::Uuid;

use crate::automation::TaskAction;
use crate::error::{SyncError, map_db_err};
use crate::models::automation_task::{ActiveModel, Column, Entity, Model, TaskKind, TaskStatus};

/// Repository for automation task database operations
#[derive(Debug, Clone)]
pub struct AutomationTaskRepository {
    db: DatabaseConnection,
}

impl AutomationTaskRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn active_model(job_id: Uuid, action: &TaskAction) -> Result<ActiveModel, SyncError> {
        Ok(ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            kind: Set(action.kind()),
            status: Set(TaskStatus::Pending),
            payload: Set(action.payload()?),
            created_at: Set(Utc::now().fixed_offset()),
            started_at: Set(None),
            finished_at: Set(None),
            error_message: Set(None),
            retry_count: Set(0),
        })
    }

    /// Insert a single pending task.
    pub async fn create(&self, job_id: Uuid, action: &TaskAction) -> Result<Model, SyncError> {
        let task = Self::active_model(job_id, action)?
            .insert(&self.db)
            .await
            .map_err(|err| map_db_err("failed to create automation task", err))?;

        tracing::debug!(job_id = %job_id, task_id = %task.id, kind = task.kind.as_str(), "Automation task created");
        Ok(task)
    }

    /// Insert a batch of pending tasks in one transaction.
    ///
    /// Either every task is stored or none is. The returned rows follow the
    /// order of `actions`.
    pub async fn create_batch(
        &self,
        job_id: Uuid,
        actions: &[TaskAction],
    ) -> Result<Vec<Model>, SyncError> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| map_db_err("failed to open task batch transaction", err))?;

        let created = Self::insert_all(&txn, job_id, actions).await?;

        txn.commit()
            .await
            .map_err(|err| map_db_err("failed to commit task batch", err))?;

        tracing::info!(job_id = %job_id, tasks = created.len(), "Automation task batch stored");
        Ok(created)
    }

    /// Inserts pending tasks on `conn`, in the order of `actions`. Atomic
    /// only when `conn` is a transaction.
    pub async fn insert_all<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        actions: &[TaskAction],
    ) -> Result<Vec<Model>, SyncError> {
        let models = actions
            .iter()
            .map(|action| Self::active_model(job_id, action))
            .collect::<Result<Vec<_>, _>>()?;

        let mut created = Vec::with_capacity(models.len());
        for model in models {
            let task = model
                .insert(conn)
                .await
                .map_err(|err| map_db_err("failed to insert automation task", err))?;
            created.push(task);
        }
        Ok(created)
    }

    pub async fn find(&self, task_id: Uuid) -> Result<Option<Model>, SyncError> {
        Entity::find_by_id(task_id)
            .one(&self.db)
            .await
            .map_err(|err| map_db_err("failed to find automation task", err))
    }

    /// Tasks of a job in creation order.
    pub async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to list tasks by job", err))
    }

    /// Tasks of one kind within a job, optionally restricted to some statuses.
    pub async fn list_by_job_and_kind(
        &self,
        job_id: Uuid,
        kind: TaskKind,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Model>, SyncError> {
        let mut query = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Kind.eq(kind));
        if !statuses.is_empty() {
            query = query.filter(Column::Status.is_in(statuses.iter().copied()));
        }

        query
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to list tasks by job and kind", err))
    }

    /// All tasks, newest first.
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Model>, SyncError> {
        let mut query = Entity::find();
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }

        query
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to list automation tasks", err))
    }

    /// Unconditional status write.
    pub async fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<Model, SyncError> {
        let result = Self::status_update(status, message, Utc::now().fixed_offset())
            .filter(Column::Id.eq(task_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to update automation task status", err))?;

        if result.rows_affected == 0 {
            return Err(SyncError::NotFound {
                entity: "automation task",
                id: task_id,
            });
        }

        self.find(task_id).await?.ok_or(SyncError::NotFound {
            entity: "automation task",
            id: task_id,
        })
    }

    /// Atomically claims a task for execution.
    ///
    /// Tasks that already succeeded or are running are left alone. Claiming a
    /// task that was started before counts as a retry.
    pub async fn try_start(&self, task_id: Uuid) -> Result<bool, SyncError> {
        let retry_count = Expr::case(
            Expr::col(Column::StartedAt).is_null(),
            Expr::col(Column::RetryCount),
        )
        .finally(Expr::col(Column::RetryCount).add(1));

        let result = Self::status_update(TaskStatus::Running, None, Utc::now().fixed_offset())
            .col_expr(Column::RetryCount, retry_count.into())
            .col_expr(Column::ErrorMessage, Expr::value(Option::<String>::None))
            .filter(Column::Id.eq(task_id))
            .filter(Column::Status.is_not_in([TaskStatus::Success, TaskStatus::Running]))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to claim automation task", err))?;

        Ok(result.rows_affected > 0)
    }

    /// Final write for a running task. A task cancelled meanwhile keeps its status.
    pub async fn finish(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        let result = Self::status_update(status, message, Utc::now().fixed_offset())
            .filter(Column::Id.eq(task_id))
            .filter(Column::Status.eq(TaskStatus::Running))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to finish automation task", err))?;

        Ok(result.rows_affected > 0)
    }

    /// Marks a pending or running task as cancelled.
    pub async fn cancel(&self, task_id: Uuid, message: &str) -> Result<bool, SyncError> {
        let result = Self::status_update(
            TaskStatus::Cancelled,
            Some(message.to_string()),
            Utc::now().fixed_offset(),
        )
        .filter(Column::Id.eq(task_id))
        .filter(Column::Status.is_in([TaskStatus::Pending, TaskStatus::Running]))
        .exec(&self.db)
        .await
        .map_err(|err| map_db_err("failed to cancel automation task", err))?;

        Ok(result.rows_affected > 0)
    }

    fn status_update(
        status: TaskStatus,
        message: Option<String>,
        now: DateTime<FixedOffset>,
    ) -> UpdateMany<Entity> {
        let none: Option<DateTime<FixedOffset>> = None;
        let mut update = Entity::update_many().col_expr(Column::Status, Expr::value(status));

        update = match status {
            TaskStatus::Running => update
                .col_expr(Column::StartedAt, Expr::value(Some(now)))
                .col_expr(Column::FinishedAt, Expr::value(none)),
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled => {
                update.col_expr(Column::FinishedAt, Expr::value(Some(now)))
            }
            TaskStatus::Pending => update.col_expr(Column::FinishedAt, Expr::value(none)),
        };

        if let Some(message) = message {
            update = update.col_expr(Column::ErrorMessage, Expr::value(message));
        }

        update
    }
}
