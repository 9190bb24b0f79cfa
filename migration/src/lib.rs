//! Database migrations for the HR sync engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_090000_create_sync_jobs;
mod m2026_01_10_090100_create_automation_tasks;
mod m2026_01_10_090200_create_sync_logs;
mod m2026_01_10_090300_create_record_cache;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_090000_create_sync_jobs::Migration),
            Box::new(m2026_01_10_090100_create_automation_tasks::Migration),
            Box::new(m2026_01_10_090200_create_sync_logs::Migration),
            Box::new(m2026_01_10_090300_create_record_cache::Migration),
        ]
    }
}
