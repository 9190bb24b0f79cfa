//! Typed automation task actions and their dispatch onto an [`Automation`] driver.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::Automation;
use crate::error::SyncError;
use crate::models::automation_task::TaskKind;
use crate::normalizer::leave_upload_line;
use crate::reconciliation::ChangedEmployee;
use crate::records::{EmployeeRecord, LeaveRecord};

/// One corrective action against the timekeeping system.
///
/// Persisted as a `(kind, payload)` pair on the automation task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskAction {
    AddEmployee(EmployeeRecord),
    RemoveEmployee(EmployeeRecord),
    UpdateEmployee(ChangedEmployee),
    AddLeave(LeaveRecord),
}

impl TaskAction {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskAction::AddEmployee(_) => TaskKind::AddEmployee,
            TaskAction::RemoveEmployee(_) => TaskKind::RemoveEmployee,
            TaskAction::UpdateEmployee(_) => TaskKind::UpdateEmployee,
            TaskAction::AddLeave(_) => TaskKind::AddLeave,
        }
    }

    /// JSON payload stored next to the kind.
    pub fn payload(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            TaskAction::AddEmployee(record) | TaskAction::RemoveEmployee(record) => {
                serde_json::to_value(record)
            }
            TaskAction::UpdateEmployee(changed) => serde_json::to_value(changed),
            TaskAction::AddLeave(leave) => serde_json::to_value(leave),
        }
    }

    /// Rebuilds an action from its persisted form.
    pub fn from_parts(kind: &TaskKind, payload: &JsonValue) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            TaskKind::AddEmployee => TaskAction::AddEmployee(serde_json::from_value(payload.clone())?),
            TaskKind::RemoveEmployee => {
                TaskAction::RemoveEmployee(serde_json::from_value(payload.clone())?)
            }
            TaskKind::UpdateEmployee => {
                TaskAction::UpdateEmployee(serde_json::from_value(payload.clone())?)
            }
            TaskKind::AddLeave => TaskAction::AddLeave(serde_json::from_value(payload.clone())?),
        })
    }

    /// The employee row the timekeeping system holds once this action succeeded.
    pub fn resulting_employee(&self) -> Option<&EmployeeRecord> {
        match self {
            TaskAction::AddEmployee(record) | TaskAction::RemoveEmployee(record) => Some(record),
            TaskAction::UpdateEmployee(changed) => Some(&changed.record),
            TaskAction::AddLeave(_) => None,
        }
    }

    /// Performs the action. Blocking; call it through [`super::run_blocking`].
    ///
    /// Leave imports go through a file written to `upload_dir`, removed again
    /// whether or not the import was accepted.
    pub fn dispatch(
        &self,
        automation: &dyn Automation,
        upload_dir: &Path,
        task_id: Uuid,
    ) -> Result<(), SyncError> {
        match self {
            TaskAction::AddEmployee(record) => automation.add_employee(record)?,
            TaskAction::RemoveEmployee(record) => automation.remove_employee(record)?,
            TaskAction::UpdateEmployee(changed) => {
                automation.update_employee(&changed.record, &changed.changed_fields)?
            }
            TaskAction::AddLeave(leave) => {
                fs::create_dir_all(upload_dir)?;
                let upload_file = upload_dir.join(format!("leave_{task_id}.csv"));
                let upload_file = scopeguard::guard(upload_file, |path| {
                    if let Err(err) = fs::remove_file(&path)
                        && err.kind() != std::io::ErrorKind::NotFound
                    {
                        tracing::warn!(
                            path = %path.display(),
                            error = %err,
                            "Failed to remove leave upload file"
                        );
                    }
                });
                fs::write(&*upload_file, format!("{}\n", leave_upload_line(leave)))?;
                automation.add_leave(&upload_file)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::WatchedField;
    use chrono::NaiveDate;

    fn sample_actions() -> Vec<TaskAction> {
        let record = EmployeeRecord::new("000001").with_name("ANA");
        let leave = LeaveRecord::new(
            "000001",
            "010",
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
        );
        vec![
            TaskAction::AddEmployee(record.clone()),
            TaskAction::RemoveEmployee(record.clone()),
            TaskAction::UpdateEmployee(ChangedEmployee {
                record,
                changed_fields: vec![WatchedField::Name],
            }),
            TaskAction::AddLeave(leave),
        ]
    }

    #[test]
    fn actions_rebuild_from_kind_and_payload() {
        for action in sample_actions() {
            let payload = action.payload().unwrap();
            let rebuilt = TaskAction::from_parts(&action.kind(), &payload).unwrap();
            assert_eq!(rebuilt, action);
        }
    }

    #[test]
    fn payload_of_wrong_kind_is_rejected() {
        let payload = serde_json::json!({"id": "000001"});
        assert!(TaskAction::from_parts(&TaskKind::AddLeave, &payload).is_err());
    }

    #[test]
    fn leave_actions_do_not_touch_employee_cache() {
        let actions = sample_actions();
        assert!(actions[0].resulting_employee().is_some());
        assert!(actions[2].resulting_employee().is_some());
        assert!(actions[3].resulting_employee().is_none());
    }
}
