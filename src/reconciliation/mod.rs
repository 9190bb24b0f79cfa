//! # Reconciliation Engine
//!
//! Turns the payroll table (source of truth), the timekeeping table (target)
//! and two leave exports into four disjoint batches of corrective work:
//!
//! * new employees to register,
//! * dismissals to push,
//! * employees whose watched fields drifted,
//! * leaves not seen in the previous export.
//!
//! Everything here is pure; persistence and automation happen in the
//! orchestrator.

mod employees;
mod leaves;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::automation::TaskAction;
use crate::error::SyncError;
use crate::records::{EmployeeRecord, HrSystem, LeaveRecord};

pub use employees::{ChangedEmployee, EXCLUDED_BINDING, WatchedField};
pub use leaves::{LeaveCodeTable, diff_leaves, enrich_leaves};

pub(crate) use employees::index_by_id;

/// Snapshot handed to [`reconcile`].
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationInput<'a> {
    pub payroll_employees: &'a [EmployeeRecord],
    pub timekeeping_employees: &'a [EmployeeRecord],
    /// Leaves recorded by the previous successful pass.
    pub previous_leaves: &'a [LeaveRecord],
    /// Leaves in the export downloaded by this pass.
    pub current_leaves: &'a [LeaveRecord],
    pub leave_codes: Option<&'a LeaveCodeTable>,
    /// Dismissals dated after this day are held back.
    pub today: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationOutput {
    pub new_employees: Vec<EmployeeRecord>,
    pub dismissed_employees: Vec<EmployeeRecord>,
    pub changed_employees: Vec<ChangedEmployee>,
    pub new_leaves: Vec<LeaveRecord>,
    /// Fresh leave export after enrichment; becomes the next pass's snapshot.
    pub leave_snapshot: Vec<LeaveRecord>,
}

/// Batch sizes of one reconciliation pass, stored on the job metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub new_employees: usize,
    pub dismissed_employees: usize,
    pub changed_employees: usize,
    pub new_leaves: usize,
}

impl ReconciliationSummary {
    pub fn total(&self) -> usize {
        self.new_employees + self.dismissed_employees + self.changed_employees + self.new_leaves
    }
}

impl ReconciliationOutput {
    pub fn summary(&self) -> ReconciliationSummary {
        ReconciliationSummary {
            new_employees: self.new_employees.len(),
            dismissed_employees: self.dismissed_employees.len(),
            changed_employees: self.changed_employees.len(),
            new_leaves: self.new_leaves.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary().total() == 0
    }

    /// Task actions in batch order: additions, dismissals, updates, leaves.
    pub fn actions(&self) -> Vec<TaskAction> {
        let mut actions = Vec::with_capacity(self.summary().total());
        actions.extend(self.new_employees.iter().cloned().map(TaskAction::AddEmployee));
        actions.extend(
            self.dismissed_employees
                .iter()
                .cloned()
                .map(TaskAction::RemoveEmployee),
        );
        actions.extend(
            self.changed_employees
                .iter()
                .cloned()
                .map(TaskAction::UpdateEmployee),
        );
        actions.extend(self.new_leaves.iter().cloned().map(TaskAction::AddLeave));
        actions
    }
}

/// Runs one reconciliation pass.
///
/// Identifiers are zero padded on both sides before any comparison. A row
/// without identifier is malformed input and aborts the pass. An empty payroll
/// table yields empty batches: nothing is trusted without the source of truth.
pub fn reconcile(input: &ReconciliationInput<'_>) -> Result<ReconciliationOutput, SyncError> {
    if input.payroll_employees.is_empty() {
        return Ok(ReconciliationOutput::default());
    }

    let payroll = index_by_id(input.payroll_employees, HrSystem::Payroll)?;
    let timekeeping = index_by_id(input.timekeeping_employees, HrSystem::Timekeeping)?;
    leaves::validate_leaves(input.previous_leaves)?;
    leaves::validate_leaves(input.current_leaves)?;

    let diff = employees::diff_employees(&payroll, &timekeeping, input.today);
    let leave_snapshot = enrich_leaves(input.current_leaves, &payroll, input.leave_codes);
    let new_leaves = diff_leaves(input.previous_leaves, &leave_snapshot);

    Ok(ReconciliationOutput {
        new_employees: diff.new_employees,
        dismissed_employees: diff.dismissed_employees,
        changed_employees: diff.changed_employees,
        new_leaves,
        leave_snapshot,
    })
}
