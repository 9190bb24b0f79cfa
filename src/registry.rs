//! Task registry
//!
//! In-memory map of sync jobs executing in this process to the cancellation
//! token that stops them. A Running job without an entry here is a zombie.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cancellation handle of one executing job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub token: CancellationToken,
    pub registered_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            registered_at: Utc::now(),
        }
    }
}

/// Concurrent map of executing job ids to their handles
#[derive(Debug, Default)]
pub struct TaskRegistry {
    handles: RwLock<HashMap<Uuid, JobHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job, replacing any handle left behind for the same id.
    pub fn register(&self, job_id: Uuid, handle: JobHandle) {
        let previous = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, handle);
        if previous.is_some() {
            warn!(job_id = %job_id, "Replacing existing job handle");
        } else {
            debug!(job_id = %job_id, "Job handle registered");
        }
    }

    /// Removes a job's handle. Unknown ids are logged and ignored.
    pub fn unregister(&self, job_id: Uuid) -> Option<JobHandle> {
        let removed = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
        if removed.is_none() {
            warn!(job_id = %job_id, "Attempted to unregister unknown job");
        }
        removed
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobHandle> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    /// Snapshot of every registered handle.
    pub fn get_all(&self) -> Vec<(Uuid, JobHandle)> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
