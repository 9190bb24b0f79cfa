//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! one row per end-to-end reconciliation run between payroll and timekeeping.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Lifecycle of a sync job.
///
/// `Pending -> Running -> {Success | Failed | Cancelled | Retrying}` and
/// `Retrying -> Running | Failed`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SyncJobStatus {
    #[sea_orm(string_value = "pending")]
    #[serde(rename = "pending")]
    #[default]
    Pending,

    #[sea_orm(string_value = "running")]
    #[serde(rename = "running")]
    Running,

    #[sea_orm(string_value = "success")]
    #[serde(rename = "success")]
    Success,

    #[sea_orm(string_value = "failed")]
    #[serde(rename = "failed")]
    Failed,

    #[sea_orm(string_value = "cancelled")]
    #[serde(rename = "cancelled")]
    Cancelled,

    #[sea_orm(string_value = "retrying")]
    #[serde(rename = "retrying")]
    Retrying,
}

impl SyncJobStatus {
    /// Success, Failed and Cancelled never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncJobStatus::Success | SyncJobStatus::Failed | SyncJobStatus::Cancelled
        )
    }

    /// Only pending and retrying jobs may enter Running.
    pub fn is_startable(&self) -> bool {
        matches!(self, SyncJobStatus::Pending | SyncJobStatus::Retrying)
    }
}

/// SyncJob entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub status: SyncJobStatus,

    /// Who or what requested the run (operator name, `scheduler`, `cli`)
    pub triggered_by: String,

    pub created_at: DateTimeWithTimeZone,

    /// Set each time the job enters Running
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Set iff the status is terminal
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Last failure or summary message
    pub error_message: Option<String>,

    /// Number of job-level retries already scheduled
    pub retry_count: i32,

    /// Set iff the status is Retrying
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    /// Batch counts and other run details
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: JsonValue,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::automation_task::Entity")]
    AutomationTask,
    #[sea_orm(has_many = "super::sync_log::Entity")]
    SyncLog,
}

impl Related<super::automation_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AutomationTask.def()
    }
}

impl Related<super::sync_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_startable_states_are_disjoint() {
        use sea_orm::Iterable;
        for status in SyncJobStatus::iter() {
            assert!(!(status.is_terminal() && status.is_startable()), "{status:?}");
        }
        assert!(SyncJobStatus::Retrying.is_startable());
        assert!(!SyncJobStatus::Running.is_terminal());
    }
}
