//! Migration to create the record cache tables.
//!
//! `cached_employees` keeps the last downloaded employee table of each system,
//! keyed by (system, id). `cached_leaves` keeps the last leave export so the
//! next run only reports leaves that were not seen before.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CachedEmployees::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CachedEmployees::System).text().not_null())
                    .col(ColumnDef::new(CachedEmployees::Id).text().not_null())
                    .col(ColumnDef::new(CachedEmployees::Name).text().null())
                    .col(ColumnDef::new(CachedEmployees::Cpf).text().null())
                    .col(ColumnDef::new(CachedEmployees::Position).text().null())
                    .col(ColumnDef::new(CachedEmployees::Department).text().null())
                    .col(ColumnDef::new(CachedEmployees::Binding).text().null())
                    .col(ColumnDef::new(CachedEmployees::AdmissionDate).date().null())
                    .col(ColumnDef::new(CachedEmployees::DismissalDate).date().null())
                    .col(
                        ColumnDef::new(CachedEmployees::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_cached_employees")
                            .col(CachedEmployees::System)
                            .col(CachedEmployees::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CachedLeaves::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CachedLeaves::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CachedLeaves::EmployeeId).text().not_null())
                    .col(ColumnDef::new(CachedLeaves::EmployeeName).text().null())
                    .col(ColumnDef::new(CachedLeaves::Code).text().not_null())
                    .col(ColumnDef::new(CachedLeaves::CodeName).text().null())
                    .col(ColumnDef::new(CachedLeaves::StartDate).date().not_null())
                    .col(ColumnDef::new(CachedLeaves::EndDate).date().not_null())
                    .col(
                        ColumnDef::new(CachedLeaves::Duration)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    // Empty string stands for "no time" so the unique key below holds.
                    .col(
                        ColumnDef::new(CachedLeaves::StartTime)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(CachedLeaves::EndTime)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(CachedLeaves::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cached_leaves_unique_key")
                    .table(CachedLeaves::Table)
                    .col(CachedLeaves::EmployeeId)
                    .col(CachedLeaves::Code)
                    .col(CachedLeaves::StartDate)
                    .col(CachedLeaves::EndDate)
                    .col(CachedLeaves::StartTime)
                    .col(CachedLeaves::EndTime)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_cached_leaves_unique_key")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CachedLeaves::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CachedEmployees::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CachedEmployees {
    Table,
    System,
    Id,
    Name,
    Cpf,
    Position,
    Department,
    Binding,
    AdmissionDate,
    DismissalDate,
    LastSyncedAt,
}

#[derive(DeriveIden)]
enum CachedLeaves {
    Table,
    Id,
    EmployeeId,
    EmployeeName,
    Code,
    CodeName,
    StartDate,
    EndDate,
    Duration,
    StartTime,
    EndTime,
    LastSyncedAt,
}
