//! Append-only job and task logs.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::{SyncError, map_db_err};
use crate::models::sync_log::{ActiveModel, Column, Entity, LogLevel, Model};

#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    db: DatabaseConnection,
}

impl SyncLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn append(
        &self,
        job_id: Uuid,
        level: LogLevel,
        message: &str,
        task_id: Option<Uuid>,
    ) -> Result<Model, SyncError> {
        ActiveModel {
            id: NotSet,
            job_id: Set(job_id),
            task_id: Set(task_id),
            level: Set(level),
            message: Set(message.to_string()),
            timestamp: Set(Utc::now().fixed_offset()),
        }
        .insert(&self.db)
        .await
        .map_err(|err| map_db_err("failed to append sync log", err))
    }

    /// Job level lines (no task attached), oldest first.
    pub async fn for_job(&self, job_id: Uuid) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::TaskId.is_null())
            .order_by_asc(Column::Timestamp)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load job logs", err))
    }

    /// Lines written while executing one task, oldest first.
    pub async fn for_task(&self, task_id: Uuid) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::TaskId.eq(task_id))
            .order_by_asc(Column::Timestamp)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load task logs", err))
    }
}
