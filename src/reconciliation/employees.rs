//! Employee table diff: new, dismissed and changed employees.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;
use crate::normalizer::{format_date, normalize_text, pad_id};
use crate::records::{EmployeeRecord, HrSystem};

/// Employment binding that is never registered in the timekeeping system.
pub const EXCLUDED_BINDING: &str = "AUXILIO RECLUSAO";

/// Attributes compared between the two systems to detect drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedField {
    Name,
    AdmissionDate,
    Position,
    Department,
}

impl WatchedField {
    pub const ALL: [WatchedField; 4] = [
        WatchedField::Name,
        WatchedField::AdmissionDate,
        WatchedField::Position,
        WatchedField::Department,
    ];

    /// Normalized comparison value of this field.
    pub fn comparable(&self, record: &EmployeeRecord) -> Option<String> {
        match self {
            WatchedField::Name => normalize_text(record.name.as_deref()),
            WatchedField::AdmissionDate => record
                .admission_date
                .map(format_date)
                .and_then(|date| normalize_text(Some(&date))),
            WatchedField::Position => normalize_text(record.position.as_deref()),
            WatchedField::Department => normalize_text(record.department.as_deref()),
        }
    }
}

/// A payroll employee whose timekeeping row drifted on at least one watched field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedEmployee {
    /// Payroll values to push.
    pub record: EmployeeRecord,
    pub changed_fields: Vec<WatchedField>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct EmployeeDiff {
    pub new_employees: Vec<EmployeeRecord>,
    pub dismissed_employees: Vec<EmployeeRecord>,
    pub changed_employees: Vec<ChangedEmployee>,
}

/// Indexes rows by padded id. The first row of a duplicated id wins.
pub(crate) fn index_by_id(
    records: &[EmployeeRecord],
    system: HrSystem,
) -> Result<BTreeMap<String, EmployeeRecord>, SyncError> {
    let mut index = BTreeMap::new();
    for record in records {
        let trimmed = record.id.trim();
        if trimmed.is_empty() {
            return Err(SyncError::reconciliation(format!(
                "{system} employee row without id (name: {:?})",
                record.name
            )));
        }

        let id = pad_id(trimmed);
        if index.contains_key(&id) {
            debug!(%system, id = %id, "Duplicate employee row ignored");
            continue;
        }
        index.insert(
            id.clone(),
            EmployeeRecord {
                id,
                ..record.clone()
            },
        );
    }
    Ok(index)
}

fn dismissed_ids(index: &BTreeMap<String, EmployeeRecord>) -> BTreeSet<&str> {
    index
        .values()
        .filter(|record| record.is_dismissed())
        .map(|record| record.id.as_str())
        .collect()
}

pub(crate) fn diff_employees(
    payroll: &BTreeMap<String, EmployeeRecord>,
    timekeeping: &BTreeMap<String, EmployeeRecord>,
    today: NaiveDate,
) -> EmployeeDiff {
    let payroll_dismissed = dismissed_ids(payroll);
    let timekeeping_dismissed = dismissed_ids(timekeeping);

    let active_payroll: Vec<&EmployeeRecord> = payroll
        .values()
        .filter(|record| {
            let id = record.id.as_str();
            !payroll_dismissed.contains(id) && !timekeeping_dismissed.contains(id)
        })
        .collect();

    let excluded_binding = normalize_text(Some(EXCLUDED_BINDING));
    let new_employees = active_payroll
        .iter()
        .filter(|record| !timekeeping.contains_key(&record.id))
        .filter(|record| normalize_text(record.binding.as_deref()) != excluded_binding)
        .map(|record| (*record).clone())
        .collect();

    let dismissed_employees = timekeeping
        .values()
        .filter(|record| {
            let id = record.id.as_str();
            payroll_dismissed.contains(id) && !timekeeping_dismissed.contains(id)
        })
        .filter_map(|record| {
            let dismissal_date = payroll.get(&record.id)?.dismissal_date?;
            (dismissal_date <= today).then(|| EmployeeRecord {
                dismissal_date: Some(dismissal_date),
                ..record.clone()
            })
        })
        .collect();

    let changed_employees = active_payroll
        .iter()
        .filter_map(|record| {
            let current = timekeeping.get(&record.id)?;
            let changed_fields: Vec<WatchedField> = WatchedField::ALL
                .into_iter()
                .filter(|field| field.comparable(record) != field.comparable(current))
                .collect();
            (!changed_fields.is_empty()).then(|| ChangedEmployee {
                record: (*record).clone(),
                changed_fields,
            })
        })
        .collect();

    EmployeeDiff {
        new_employees,
        dismissed_employees,
        changed_employees,
    }
}
