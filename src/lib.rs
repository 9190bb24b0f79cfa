//! # HR Sync Library
//!
//! Job orchestration and reconciliation engine that keeps a timekeeping
//! system aligned with a payroll system: downloads both sides, reconciles
//! them into automation tasks and tracks job and task lifecycles.

pub mod automation;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod reconciliation;
pub mod records;
pub mod registry;
pub mod repositories;
pub mod scheduler;
pub mod telemetry;
pub use migration;
