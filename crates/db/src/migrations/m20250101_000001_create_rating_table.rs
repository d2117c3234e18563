//! Create rating table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Rating::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Rating::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Rating::Name).string_len(191).not_null())
                    .col(
                        ColumnDef::new(Rating::TotalVotes)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Rating::TotalRating)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Rating::ParentId).string_len(32).null())
                    .col(
                        ColumnDef::new(Rating::EffectType)
                            .string_len(16)
                            .not_null()
                            .default("positive"),
                    )
                    .col(
                        ColumnDef::new(Rating::DisplayOnly)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Rating::MirrorOf).string_len(32).null())
                    .col(
                        ColumnDef::new(Rating::DateCreated)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rating_parent")
                            .from(Rating::Table, Rating::ParentId)
                            .to(Rating::Table, Rating::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rating_mirror_of")
                            .from(Rating::Table, Rating::MirrorOf)
                            .to(Rating::Table, Rating::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: parent_id (children lookups for aggregation)
        manager
            .create_index(
                Index::create()
                    .name("idx_rating_parent_id")
                    .table(Rating::Table)
                    .col(Rating::ParentId)
                    .to_owned(),
            )
            .await?;

        // Index: mirror_of (mirror lookups)
        manager
            .create_index(
                Index::create()
                    .name("idx_rating_mirror_of")
                    .table(Rating::Table)
                    .col(Rating::MirrorOf)
                    .to_owned(),
            )
            .await?;

        // Index: name (listing search)
        manager
            .create_index(
                Index::create()
                    .name("idx_rating_name")
                    .table(Rating::Table)
                    .col(Rating::Name)
                    .to_owned(),
            )
            .await?;

        // A mirror is never display-only and never a sub-rating
        manager
            .get_connection()
            .execute_unprepared(
                r"
                ALTER TABLE rating
                ADD CONSTRAINT chk_rating_mirror_shape
                CHECK (mirror_of IS NULL OR (parent_id IS NULL AND display_only = false));
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Rating::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Rating {
    Table,
    Id,
    Name,
    TotalVotes,
    TotalRating,
    ParentId,
    EffectType,
    DisplayOnly,
    MirrorOf,
    DateCreated,
}
