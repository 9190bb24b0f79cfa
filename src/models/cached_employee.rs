//! CachedEmployee entity model
//!
//! Last downloaded employee table of each HR system, keyed by (system, id).
//! The timekeeping rows are also refreshed after successful automation tasks
//! so the next reconciliation sees the changes already pushed.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelBehavior, Set};
use serde::{Deserialize, Serialize};

use crate::records::{EmployeeRecord, HrSystem};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cached_employees")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub system: HrSystem,

    /// Six digit employee identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: Option<String>,
    pub cpf: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub binding: Option<String>,
    pub admission_date: Option<Date>,
    pub dismissal_date: Option<Date>,

    pub last_synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for EmployeeRecord {
    fn from(model: Model) -> Self {
        EmployeeRecord {
            id: model.id,
            name: model.name,
            cpf: model.cpf,
            position: model.position,
            department: model.department,
            binding: model.binding,
            admission_date: model.admission_date,
            dismissal_date: model.dismissal_date,
        }
    }
}

impl ActiveModel {
    pub fn from_record(
        system: HrSystem,
        record: &EmployeeRecord,
        synced_at: DateTimeWithTimeZone,
    ) -> Self {
        Self {
            system: Set(system),
            id: Set(record.id.clone()),
            name: Set(record.name.clone()),
            cpf: Set(record.cpf.clone()),
            position: Set(record.position.clone()),
            department: Set(record.department.clone()),
            binding: Set(record.binding.clone()),
            admission_date: Set(record.admission_date),
            dismissal_date: Set(record.dismissal_date),
            last_synced_at: Set(synced_at),
        }
    }
}
