//! # SyncJob Repository
//!
//! Repository operations for the sync_jobs table. Every status write goes
//! through [`SyncJobRepository::status_update`], which keeps the timestamp
//! columns consistent with the status:
//!
//! * entering Running sets `started_at` and clears `finished_at` and `next_retry_at`,
//! * entering Retrying clears `finished_at`,
//! * entering a terminal status sets `finished_at` and clears `next_retry_at`.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, UpdateMany,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{SyncError, map_db_err};
use crate::models::sync_job::{ActiveModel, Column, Entity, Model, SyncJobStatus};

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist a new pending job.
    pub async fn create(&self, triggered_by: &str) -> Result<Model, SyncError> {
        let now = Utc::now().fixed_offset();

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            status: Set(SyncJobStatus::Pending),
            triggered_by: Set(triggered_by.to_string()),
            created_at: Set(now),
            started_at: Set(None),
            finished_at: Set(None),
            error_message: Set(None),
            retry_count: Set(0),
            next_retry_at: Set(None),
            metadata: Set(JsonValue::Object(Default::default())),
        };

        let result = job
            .insert(&self.db)
            .await
            .map_err(|err| map_db_err("failed to create sync job", err))?;

        tracing::info!(job_id = %result.id, triggered_by, "Sync job created");

        Ok(result)
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, SyncError> {
        Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .map_err(|err| map_db_err("failed to find sync job", err))
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to list sync jobs", err))
    }

    pub async fn list_with_status(&self, status: SyncJobStatus) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::Status.eq(status))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to list sync jobs by status", err))
    }

    /// Retrying jobs whose backoff elapsed at `now`.
    pub async fn ready_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::Status.eq(SyncJobStatus::Retrying))
            .filter(Column::NextRetryAt.lte(now.fixed_offset()))
            .order_by_asc(Column::NextRetryAt)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load jobs ready for retry", err))
    }

    /// Unconditional status write.
    pub async fn update_status(
        &self,
        job_id: Uuid,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<Model, SyncError> {
        let result = Self::status_update(status, message, Utc::now().fixed_offset())
            .filter(Column::Id.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to update sync job status", err))?;

        if result.rows_affected == 0 {
            tracing::error!(job_id = %job_id, "Sync job not found for status update");
            return Err(SyncError::NotFound {
                entity: "sync job",
                id: job_id,
            });
        }

        tracing::debug!(job_id = %job_id, status = ?status, "Sync job status updated");

        self.find(job_id).await?.ok_or(SyncError::NotFound {
            entity: "sync job",
            id: job_id,
        })
    }

    /// Status write applied only while the job is still in `expected`.
    ///
    /// Returns whether the transition happened.
    pub async fn transition(
        &self,
        job_id: Uuid,
        expected: SyncJobStatus,
        status: SyncJobStatus,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        let result = Self::status_update(status, message, Utc::now().fixed_offset())
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(expected))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to transition sync job", err))?;

        Ok(result.rows_affected > 0)
    }

    /// Moves a running job to Retrying, bumping its retry counter.
    pub async fn schedule_retry(
        &self,
        job_id: Uuid,
        next_retry_at: DateTime<Utc>,
        message: Option<String>,
    ) -> Result<bool, SyncError> {
        let mut update = Self::status_update(
            SyncJobStatus::Retrying,
            message,
            Utc::now().fixed_offset(),
        )
        .col_expr(Column::RetryCount, Expr::col(Column::RetryCount).add(1))
        .col_expr(
            Column::NextRetryAt,
            Expr::value(Some(next_retry_at.fixed_offset())),
        );
        update = update
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(SyncJobStatus::Running));

        let result = update
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to schedule sync job retry", err))?;

        if result.rows_affected > 0 {
            tracing::info!(job_id = %job_id, next_retry_at = %next_retry_at, "Sync job retry scheduled");
        }

        Ok(result.rows_affected > 0)
    }

    pub async fn update_metadata(&self, job_id: Uuid, metadata: JsonValue) -> Result<(), SyncError> {
        let result = Entity::update_many()
            .col_expr(Column::Metadata, Expr::value(metadata))
            .filter(Column::Id.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("failed to update sync job metadata", err))?;

        if result.rows_affected == 0 {
            return Err(SyncError::NotFound {
                entity: "sync job",
                id: job_id,
            });
        }
        Ok(())
    }

    /// Metadata write applied only while the job is Running. Runs on any
    /// connection so it can join a caller's transaction.
    pub async fn record_running_metadata<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        metadata: JsonValue,
    ) -> Result<bool, SyncError> {
        let result = Entity::update_many()
            .col_expr(Column::Metadata, Expr::value(metadata))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(SyncJobStatus::Running))
            .exec(conn)
            .await
            .map_err(|err| map_db_err("failed to update sync job metadata", err))?;

        Ok(result.rows_affected > 0)
    }

    fn status_update(
        status: SyncJobStatus,
        message: Option<String>,
        now: DateTime<FixedOffset>,
    ) -> UpdateMany<Entity> {
        let none: Option<DateTime<FixedOffset>> = None;
        let mut update = Entity::update_many().col_expr(Column::Status, Expr::value(status));

        update = match status {
            SyncJobStatus::Running => update
                .col_expr(Column::StartedAt, Expr::value(Some(now)))
                .col_expr(Column::FinishedAt, Expr::value(none))
                .col_expr(Column::NextRetryAt, Expr::value(none)),
            SyncJobStatus::Retrying => update.col_expr(Column::FinishedAt, Expr::value(none)),
            SyncJobStatus::Success | SyncJobStatus::Failed | SyncJobStatus::Cancelled => update
                .col_expr(Column::FinishedAt, Expr::value(Some(now)))
                .col_expr(Column::NextRetryAt, Expr::value(none)),
            SyncJobStatus::Pending => update,
        };

        if let Some(message) = message {
            update = update.col_expr(Column::ErrorMessage, Expr::value(message));
        }

        update
    }
}
