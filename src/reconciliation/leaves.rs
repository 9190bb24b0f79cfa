//! Leave export diff and enrichment.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::SyncError;
use crate::normalizer::{pad_code, pad_id};
use crate::records::{EmployeeRecord, LeaveKey, LeaveRecord, leave_duration};

/// Leave code to description lookup (e.g. `"010" -> "FERIAS"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveCodeTable {
    names: HashMap<String, String>,
}

impl LeaveCodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: &str, name: impl Into<String>) {
        self.names.insert(pad_code(code), name.into());
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.names.get(&pad_code(code)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parses a comma separated `code=description` list.
    ///
    /// Entries without `=` or with an empty code are skipped.
    pub fn parse(raw: &str) -> Self {
        raw.split(',')
            .filter_map(|entry| entry.split_once('='))
            .map(|(code, name)| (code.trim(), name.trim()))
            .filter(|(code, _)| !code.is_empty())
            .collect()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for LeaveCodeTable {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut table = LeaveCodeTable::new();
        for (code, name) in iter {
            table.insert(code, name);
        }
        table
    }
}

pub(crate) fn validate_leaves(leaves: &[LeaveRecord]) -> Result<(), SyncError> {
    match leaves.iter().find(|leave| leave.employee_id.trim().is_empty()) {
        Some(leave) => Err(SyncError::reconciliation(format!(
            "leave row without employee id (code {}, start {})",
            leave.code, leave.start_date
        ))),
        None => Ok(()),
    }
}

/// Fills employee and code names and recomputes durations of a fresh export.
///
/// Without a code table, code names are left as exported.
pub fn enrich_leaves(
    leaves: &[LeaveRecord],
    payroll: &BTreeMap<String, EmployeeRecord>,
    codes: Option<&LeaveCodeTable>,
) -> Vec<LeaveRecord> {
    leaves
        .iter()
        .map(|leave| {
            let employee_id = pad_id(&leave.employee_id);
            let employee_name = payroll
                .get(&employee_id)
                .and_then(|employee| employee.name.clone())
                .or_else(|| leave.employee_name.clone());
            let code_name = codes
                .and_then(|table| table.get(&leave.code))
                .map(str::to_string)
                .or_else(|| leave.code_name.clone());

            LeaveRecord {
                employee_id,
                employee_name,
                code: pad_code(&leave.code),
                code_name,
                duration: leave_duration(leave.start_date, leave.end_date),
                ..leave.clone()
            }
        })
        .collect()
}

/// Leaves present in `current` but not in `previous`, each reported once,
/// ordered by key. Leaves that disappeared from the export are ignored.
pub fn diff_leaves(previous: &[LeaveRecord], current: &[LeaveRecord]) -> Vec<LeaveRecord> {
    let known: HashSet<LeaveKey> = previous.iter().map(LeaveRecord::key).collect();
    let mut fresh: BTreeMap<LeaveKey, LeaveRecord> = BTreeMap::new();

    for leave in current {
        let key = leave.key();
        if known.contains(&key) {
            continue;
        }
        fresh.entry(key).or_insert_with(|| leave.clone());
    }

    fresh.into_values().collect()
}
