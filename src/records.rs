//! # Records
//!
//! Typed rows exchanged between the automation collaborator, the record cache
//! and the reconciliation engine.

use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::normalizer::{pad_code, pad_id};

/// The two HR back-ends kept in line by the sync engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum HrSystem {
    /// Source of truth for hiring, dismissal and identity.
    #[sea_orm(string_value = "payroll")]
    #[serde(rename = "payroll")]
    Payroll,

    /// Target system that receives the corrective actions.
    #[sea_orm(string_value = "timekeeping")]
    #[serde(rename = "timekeeping")]
    Timekeeping,
}

impl HrSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            HrSystem::Payroll => "payroll",
            HrSystem::Timekeeping => "timekeeping",
        }
    }
}

impl std::fmt::Display for HrSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One employee row as exported by either system.
///
/// `binding` (employment binding category) is only populated by the payroll
/// export. Dates are already parsed; unparsable dates arrive as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissal_date: Option<NaiveDate>,
}

impl EmployeeRecord {
    /// Creates a record with only the identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    pub fn with_admission_date(mut self, date: NaiveDate) -> Self {
        self.admission_date = Some(date);
        self
    }

    pub fn with_dismissal_date(mut self, date: NaiveDate) -> Self {
        self.dismissal_date = Some(date);
        self
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissal_date.is_some()
    }
}

/// One leave (absence) row from the payroll leave export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRecord {
    pub employee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl LeaveRecord {
    /// Creates a leave with its duration derived from the date range.
    pub fn new(
        employee_id: impl Into<String>,
        code: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            employee_name: None,
            code: code.into(),
            code_name: None,
            start_date,
            end_date,
            duration: leave_duration(start_date, end_date),
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_times(mut self, start_time: impl Into<String>, end_time: impl Into<String>) -> Self {
        self.start_time = Some(start_time.into());
        self.end_time = Some(end_time.into());
        self
    }

    /// Identity of the leave used to diff two exports.
    pub fn key(&self) -> LeaveKey {
        LeaveKey {
            employee_id: pad_id(&self.employee_id),
            code: pad_code(&self.code),
            start_date: self.start_date,
            end_date: self.end_date,
            start_time: time_key(self.start_time.as_deref()),
            end_time: time_key(self.end_time.as_deref()),
        }
    }
}

/// Composite identity of a leave row. Missing times are represented as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaveKey {
    pub employee_id: String,
    pub code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
}

/// Inclusive day count of a leave, never below one.
pub fn leave_duration(start_date: NaiveDate, end_date: NaiveDate) -> i64 {
    ((end_date - start_date).num_days() + 1).max(1)
}

fn time_key(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}
