//! # Record Cache Repository
//!
//! Last known employee tables of both systems and the leave snapshot of the
//! last successful pass.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};

use crate::error::{SyncError, map_db_err};
use crate::models::{cached_employee, cached_leave};
use crate::records::{EmployeeRecord, HrSystem, LeaveRecord};

/// Rows per multi-row insert, kept well below SQLite's bound parameter limit.
const INSERT_CHUNK: usize = 50;

#[derive(Debug, Clone)]
pub struct RecordCacheRepository {
    db: DatabaseConnection,
}

impl RecordCacheRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn employees(&self, system: HrSystem) -> Result<Vec<EmployeeRecord>, SyncError> {
        let rows = cached_employee::Entity::find()
            .filter(cached_employee::Column::System.eq(system))
            .order_by_asc(cached_employee::Column::Id)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load cached employees", err))?;

        Ok(rows.into_iter().map(EmployeeRecord::from).collect())
    }

    /// Upserts employee rows keyed by (system, id).
    pub async fn upsert_employees(
        &self,
        system: HrSystem,
        records: &[EmployeeRecord],
    ) -> Result<u64, SyncError> {
        if records.is_empty() {
            return Ok(0);
        }

        let synced_at = Utc::now().fixed_offset();
        let conflict = OnConflict::columns([
            cached_employee::Column::System,
            cached_employee::Column::Id,
        ])
        .update_columns([
            cached_employee::Column::Name,
            cached_employee::Column::Cpf,
            cached_employee::Column::Position,
            cached_employee::Column::Department,
            cached_employee::Column::Binding,
            cached_employee::Column::AdmissionDate,
            cached_employee::Column::DismissalDate,
            cached_employee::Column::LastSyncedAt,
        ])
        .to_owned();

        let mut written = 0;
        for chunk in records.chunks(INSERT_CHUNK) {
            let models = chunk
                .iter()
                .map(|record| cached_employee::ActiveModel::from_record(system, record, synced_at));
            let result = cached_employee::Entity::insert_many(models)
                .on_conflict(conflict.clone())
                .exec_without_returning(&self.db)
                .await
                .map_err(|err| map_db_err("failed to upsert cached employees", err))?;
            written += result;
        }

        tracing::debug!(%system, rows = written, "Employee cache refreshed");
        Ok(written)
    }

    pub async fn leaves(&self) -> Result<Vec<LeaveRecord>, SyncError> {
        let rows = cached_leave::Entity::find()
            .order_by_asc(cached_leave::Column::EmployeeId)
            .order_by_asc(cached_leave::Column::StartDate)
            .order_by_asc(cached_leave::Column::Id)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("failed to load cached leaves", err))?;

        Ok(rows.into_iter().map(LeaveRecord::from).collect())
    }

    /// Inserts leaves not cached yet. Rows already present are left untouched.
    pub async fn insert_leaves(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError> {
        let synced_at = Utc::now().fixed_offset();
        let mut written = 0;
        for chunk in leaves.chunks(INSERT_CHUNK) {
            let models = chunk
                .iter()
                .map(|leave| cached_leave::ActiveModel::from_record(leave, synced_at));
            written += cached_leave::Entity::insert_many(models)
                .on_conflict(Self::leave_key_conflict())
                .exec_without_returning(&self.db)
                .await
                .map_err(|err| map_db_err("failed to insert cached leaves", err))?;
        }
        Ok(written)
    }

    /// Replaces the whole leave snapshot in one transaction.
    pub async fn replace_leaves(&self, leaves: &[LeaveRecord]) -> Result<u64, SyncError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| map_db_err("failed to open leave snapshot transaction", err))?;

        let written = Self::write_leave_snapshot(&txn, leaves).await?;

        txn.commit()
            .await
            .map_err(|err| map_db_err("failed to commit leave snapshot", err))?;
        Ok(written)
    }

    /// Clears the leave snapshot and stores `leaves` on `conn`. Atomic only
    /// when `conn` is a transaction.
    pub async fn write_leave_snapshot<C: ConnectionTrait>(
        conn: &C,
        leaves: &[LeaveRecord],
    ) -> Result<u64, SyncError> {
        let synced_at = Utc::now().fixed_offset();

        cached_leave::Entity::delete_many()
            .exec(conn)
            .await
            .map_err(|err| map_db_err("failed to clear cached leaves", err))?;

        let mut written = 0;
        for chunk in leaves.chunks(INSERT_CHUNK) {
            let models = chunk
                .iter()
                .map(|leave| cached_leave::ActiveModel::from_record(leave, synced_at));
            written += cached_leave::Entity::insert_many(models)
                .on_conflict(Self::leave_key_conflict())
                .exec_without_returning(conn)
                .await
                .map_err(|err| map_db_err("failed to store leave snapshot", err))?;
        }

        tracing::debug!(rows = written, "Leave snapshot replaced");
        Ok(written)
    }

    fn leave_key_conflict() -> OnConflict {
        OnConflict::columns([
            cached_leave::Column::EmployeeId,
            cached_leave::Column::Code,
            cached_leave::Column::StartDate,
            cached_leave::Column::EndDate,
            cached_leave::Column::StartTime,
            cached_leave::Column::EndTime,
        ])
        .do_nothing()
        .to_owned()
    }
}
