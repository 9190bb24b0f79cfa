//! # Data Models
//!
//! SeaORM entities backing the sync engine: jobs, their logs and generated
//! automation tasks, plus the record cache used between passes.

pub mod automation_task;
pub mod cached_employee;
pub mod cached_leave;
pub mod sync_job;
pub mod sync_log;

pub use automation_task::Entity as AutomationTask;
pub use cached_employee::Entity as CachedEmployee;
pub use cached_leave::Entity as CachedLeave;
pub use sync_job::Entity as SyncJob;
pub use sync_log::Entity as SyncLog;
