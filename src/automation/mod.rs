//! Automation contract
//!
//! The two HR systems are only reachable through their web UIs. Driving those
//! UIs is the job of an [`Automation`] implementation; this crate only defines
//! the contract, the error classification and the task dispatch table.

pub mod action;

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use crate::error::SyncError;
use crate::reconciliation::WatchedField;
use crate::records::{EmployeeRecord, HrSystem, LeaveRecord};

pub use action::TaskAction;

/// Failures reported by an automation driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutomationError {
    /// Timeouts, flaky pages, lost sessions. Safe to try again.
    #[error("transient automation failure: {0}")]
    Transient(String),
    /// Missing driver, credentials or URLs.
    #[error("automation is not configured: {0}")]
    Configuration(String),
    /// The target UI refused the action (validation message, unknown employee).
    #[error("target system rejected the action: {0}")]
    Rejected(String),
}

impl AutomationError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient(message.into())
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AutomationError::Transient(_))
    }
}

/// Blocking driver for the legacy web applications.
///
/// Calls may take minutes; callers run them on the blocking thread pool via
/// [`run_blocking`].
pub trait Automation: Send + Sync {
    /// Exports the employee table of `system`.
    fn download_employees(&self, system: HrSystem) -> Result<Vec<EmployeeRecord>, AutomationError>;

    /// Exports payroll leaves starting at `since`.
    fn download_leaves(&self, since: NaiveDate) -> Result<Vec<LeaveRecord>, AutomationError>;

    fn add_employee(&self, record: &EmployeeRecord) -> Result<(), AutomationError>;

    fn update_employee(
        &self,
        record: &EmployeeRecord,
        changed_fields: &[WatchedField],
    ) -> Result<(), AutomationError>;

    /// Registers the dismissal carried by `record.dismissal_date`.
    fn remove_employee(&self, record: &EmployeeRecord) -> Result<(), AutomationError>;

    /// Imports a leave file in the timekeeping upload layout.
    fn add_leave(&self, upload_file: &Path) -> Result<(), AutomationError>;
}

/// Placeholder used when no UI driver is linked into the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredAutomation;

impl UnconfiguredAutomation {
    fn unavailable<T>(&self) -> Result<T, AutomationError> {
        Err(AutomationError::configuration(
            "no automation driver is linked into this build",
        ))
    }
}

impl Automation for UnconfiguredAutomation {
    fn download_employees(&self, _system: HrSystem) -> Result<Vec<EmployeeRecord>, AutomationError> {
        self.unavailable()
    }

    fn download_leaves(&self, _since: NaiveDate) -> Result<Vec<LeaveRecord>, AutomationError> {
        self.unavailable()
    }

    fn add_employee(&self, _record: &EmployeeRecord) -> Result<(), AutomationError> {
        self.unavailable()
    }

    fn update_employee(
        &self,
        _record: &EmployeeRecord,
        _changed_fields: &[WatchedField],
    ) -> Result<(), AutomationError> {
        self.unavailable()
    }

    fn remove_employee(&self, _record: &EmployeeRecord) -> Result<(), AutomationError> {
        self.unavailable()
    }

    fn add_leave(&self, _upload_file: &Path) -> Result<(), AutomationError> {
        self.unavailable()
    }
}

/// Runs a blocking automation call on the blocking thread pool.
///
/// A panic inside the driver surfaces as [`SyncError::Join`].
pub async fn run_blocking<T, E, F>(automation: &Arc<dyn Automation>, work: F) -> Result<T, SyncError>
where
    F: FnOnce(&dyn Automation) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<SyncError> + Send + 'static,
{
    let automation = Arc::clone(automation);
    let outcome = tokio::task::spawn_blocking(move || work(automation.as_ref())).await?;
    outcome.map_err(Into::into)
}
