//! Migration to create the automation_tasks table.
//!
//! Automation tasks are the corrective actions produced by a sync job, executed
//! one by one against the timekeeping system.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AutomationTasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationTasks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AutomationTasks::JobId).uuid().not_null())
                    .col(ColumnDef::new(AutomationTasks::Kind).text().not_null())
                    .col(
                        ColumnDef::new(AutomationTasks::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(AutomationTasks::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationTasks::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AutomationTasks::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(AutomationTasks::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(AutomationTasks::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_tasks_job_id")
                            .from(AutomationTasks::Table, AutomationTasks::JobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Batch execution and cancellation: tasks of one job and kind by status
        manager
            .create_index(
                Index::create()
                    .name("idx_automation_tasks_job_kind_status")
                    .table(AutomationTasks::Table)
                    .col(AutomationTasks::JobId)
                    .col(AutomationTasks::Kind)
                    .col(AutomationTasks::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automation_tasks_status_created")
                    .table(AutomationTasks::Table)
                    .col(AutomationTasks::Status)
                    .col(AutomationTasks::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_tasks_job_kind_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_tasks_status_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(AutomationTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutomationTasks {
    Table,
    Id,
    JobId,
    Kind,
    Status,
    Payload,
    CreatedAt,
    StartedAt,
    FinishedAt,
    ErrorMessage,
    RetryCount,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
}
