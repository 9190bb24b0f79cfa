//! Migration to create the append-only sync_logs table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncLogs::JobId).uuid().not_null())
                    .col(ColumnDef::new(SyncLogs::TaskId).uuid().null())
                    .col(ColumnDef::new(SyncLogs::Level).text().not_null())
                    .col(ColumnDef::new(SyncLogs::Message).text().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_logs_job_id")
                            .from(SyncLogs::Table, SyncLogs::JobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_job_timestamp")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::JobId)
                    .col(SyncLogs::Timestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_task_id")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::TaskId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_sync_logs_job_timestamp").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_sync_logs_task_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncLogs {
    Table,
    Id,
    JobId,
    TaskId,
    Level,
    Message,
    Timestamp,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
}
