//! AutomationTask entity model
//!
//! One corrective action generated by a sync job and executed later against
//! the timekeeping system.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum TaskKind {
    #[sea_orm(string_value = "add_employee")]
    #[serde(rename = "add_employee")]
    AddEmployee,

    #[sea_orm(string_value = "remove_employee")]
    #[serde(rename = "remove_employee")]
    RemoveEmployee,

    #[sea_orm(string_value = "update_employee")]
    #[serde(rename = "update_employee")]
    UpdateEmployee,

    #[sea_orm(string_value = "add_leave")]
    #[serde(rename = "add_leave")]
    AddLeave,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AddEmployee => "add_employee",
            TaskKind::RemoveEmployee => "remove_employee",
            TaskKind::UpdateEmployee => "update_employee",
            TaskKind::AddLeave => "add_leave",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        use sea_orm::Iterable;
        TaskKind::iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown task kind '{value}'"))
    }
}

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
pub enum TaskStatus {
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
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        use sea_orm::{ActiveEnum, Iterable};
        TaskStatus::iter()
            .find(|status| status.to_value() == value)
            .ok_or_else(|| format!("unknown task status '{value}'"))
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "automation_tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub job_id: Uuid,

    pub kind: TaskKind,

    pub status: TaskStatus,

    /// Serialized [`crate::automation::TaskAction`] body
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    pub error_message: Option<String>,

    /// Number of re-executions after the first attempt
    pub retry_count: i32,
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
