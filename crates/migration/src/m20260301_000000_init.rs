//! Initial schema migration - creates all tables from scratch.
//!
//! - `users`: authentication
//! - `profiles`: one per user, holds the Telegram chat id for reminders
//! - `habits`: recurring actions with schedule and incentive constraints
//!
//! Habits cascade-delete with their owner; the habit-to-habit link is weak
//! (SET NULL on delete of the target).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Users {
    Table,
    Username,
    Password,
}

#[derive(Iden)]
enum Profiles {
    Table,
    UserId,
    ChatId,
}

#[derive(Iden)]
enum Habits {
    Table,
    Id,
    UserId,
    Place,
    Time,
    Action,
    IsPleasant,
    RelatedHabitId,
    Periodicity,
    Reward,
    ExecutionTime,
    IsPublic,
    CreatedAt,
    UpdatedAt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Users
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Username)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Password).string().not_null())
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Profiles
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Profiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Profiles::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Profiles::ChatId).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-profiles-user_id")
                            .from(Profiles::Table, Profiles::UserId)
                            .to(Users::Table, Users::Username)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Habits
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Habits::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Habits::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Habits::UserId).string().not_null())
                    .col(ColumnDef::new(Habits::Place).string().not_null())
                    .col(ColumnDef::new(Habits::Time).string().not_null())
                    .col(ColumnDef::new(Habits::Action).string().not_null())
                    .col(
                        ColumnDef::new(Habits::IsPleasant)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Habits::RelatedHabitId).uuid())
                    .col(
                        ColumnDef::new(Habits::Periodicity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(Habits::Reward).string())
                    .col(ColumnDef::new(Habits::ExecutionTime).integer().not_null())
                    .col(
                        ColumnDef::new(Habits::IsPublic)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Habits::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Habits::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-habits-user_id")
                            .from(Habits::Table, Habits::UserId)
                            .to(Users::Table, Users::Username)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-habits-related_habit_id")
                            .from(Habits::Table, Habits::RelatedHabitId)
                            .to(Habits::Table, Habits::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-habits-time")
                    .table(Habits::Table)
                    .col(Habits::Time)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-habits-user_id-created_at")
                    .table(Habits::Table)
                    .col(Habits::UserId)
                    .col(Habits::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Habits::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Profiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}
