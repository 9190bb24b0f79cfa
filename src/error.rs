//! # Error Handling
//!
//! Error taxonomy shared by the orchestrator, the task coordinator and the
//! repository layer. Classification drives the retry policy: see
//! [`SyncError::is_retryable`].

use sea_orm::DbErr;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::automation::AutomationError;

/// Errors raised while running a sync job or executing an automation task.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("automation failed: {0}")]
    Automation(#[from] AutomationError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("automation worker failed: {0}")]
    Join(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn reconciliation(message: impl Into<String>) -> Self {
        Self::Reconciliation(message.into())
    }

    /// Whether the job-level retry policy applies to this error.
    ///
    /// Validation problems, bad payloads and cancellations fail fast; anything
    /// that may succeed on a later pass is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Automation(err) => err.is_retryable(),
            SyncError::Validation(_)
            | SyncError::Cancelled
            | SyncError::NotFound { .. }
            | SyncError::Payload(_) => false,
            SyncError::Reconciliation(_)
            | SyncError::Database(_)
            | SyncError::Io(_)
            | SyncError::Join(_) => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            SyncError::Cancelled
        } else {
            SyncError::Join(err.to_string())
        }
    }
}

/// Logs a database failure with its context before wrapping it.
pub(crate) fn map_db_err(context: &'static str, err: DbErr) -> SyncError {
    error!(error = ?err, context, "Database operation failed");
    SyncError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_automation_errors_are_retryable() {
        let err = SyncError::from(AutomationError::transient("timeout"));
        assert!(err.is_retryable());

        let err = SyncError::from(AutomationError::configuration("no driver"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_and_cancellation_fail_fast() {
        assert!(!SyncError::validation("missing credentials").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(SyncError::Cancelled.is_cancelled());
    }

    #[test]
    fn reconciliation_and_database_errors_retry() {
        assert!(SyncError::reconciliation("empty id").is_retryable());
        assert!(SyncError::Database(DbErr::Custom("boom".into())).is_retryable());
    }

    #[test]
    fn not_found_message_names_entity() {
        let id = Uuid::nil();
        let err = SyncError::NotFound {
            entity: "sync job",
            id,
        };
        assert_eq!(err.to_string(), format!("sync job {id} not found"));
    }
}
