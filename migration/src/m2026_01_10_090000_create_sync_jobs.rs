//! Migration to create the sync_jobs table.
//!
//! A sync job is one end-to-end reconciliation run between the payroll and
//! timekeeping systems, with its lifecycle status and retry bookkeeping.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SyncJobs::TriggeredBy).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::Metadata).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        // Retry scheduler poll: status = retrying AND next_retry_at <= now
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_status_next_retry")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::Status)
                    .col(SyncJobs::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_created_at")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_jobs_status_next_retry")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_sync_jobs_created_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    Status,
    TriggeredBy,
    CreatedAt,
    StartedAt,
    FinishedAt,
    ErrorMessage,
    RetryCount,
    NextRetryAt,
    Metadata,
}
