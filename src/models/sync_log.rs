//! SyncLog entity model
//!
//! Append-only log lines attached to a job, and optionally to one of its tasks.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum LogLevel {
    #[sea_orm(string_value = "debug")]
    #[serde(rename = "debug")]
    Debug,

    #[sea_orm(string_value = "info")]
    #[serde(rename = "info")]
    #[default]
    Info,

    #[sea_orm(string_value = "warning")]
    #[serde(rename = "warning")]
    Warning,

    #[sea_orm(string_value = "error")]
    #[serde(rename = "error")]
    Error,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub job_id: Uuid,

    /// Present for task execution logs, absent for job logs
    pub task_id: Option<Uuid>,

    pub level: LogLevel,

    #[sea_orm(column_type = "Text")]
    pub message: String,

    pub timestamp: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_job::Entity",
        from = "Column::JobId",
        to = "super::sync_job::Column::Id"
    )]
    SyncJob,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
