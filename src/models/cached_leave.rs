//! CachedLeave entity model
//!
//! Leave export of the last successful pass. Missing times are stored as empty
//! strings so the composite unique key treats them as equal.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelBehavior, NotSet, Set};
use serde::{Deserialize, Serialize};

use crate::records::LeaveRecord;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cached_leaves")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub employee_id: String,
    pub employee_name: Option<String>,
    pub code: String,
    pub code_name: Option<String>,
    pub start_date: Date,
    pub end_date: Date,
    pub duration: i32,
    pub start_time: String,
    pub end_time: String,

    pub last_synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl From<Model> for LeaveRecord {
    fn from(model: Model) -> Self {
        LeaveRecord {
            employee_id: model.employee_id,
            employee_name: model.employee_name,
            code: model.code,
            code_name: model.code_name,
            start_date: model.start_date,
            end_date: model.end_date,
            duration: i64::from(model.duration),
            start_time: non_empty(model.start_time),
            end_time: non_empty(model.end_time),
        }
    }
}

impl ActiveModel {
    pub fn from_record(leave: &LeaveRecord, synced_at: DateTimeWithTimeZone) -> Self {
        let key = leave.key();
        Self {
            id: NotSet,
            employee_id: Set(key.employee_id),
            employee_name: Set(leave.employee_name.clone()),
            code: Set(key.code),
            code_name: Set(leave.code_name.clone()),
            start_date: Set(leave.start_date),
            end_date: Set(leave.end_date),
            duration: Set(i32::try_from(leave.duration).unwrap_or(i32::MAX)),
            start_time: Set(key.start_time),
            end_time: Set(key.end_time),
            last_synced_at: Set(synced_at),
        }
    }
}
