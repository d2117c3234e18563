//! Create vote table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vote::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Vote::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Vote::RatingId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Vote::UserId)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Vote::UserIp).string_len(45).null())
                    .col(ColumnDef::new(Vote::RatingValue).integer().not_null())
                    .col(
                        ColumnDef::new(Vote::DateCreated)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Vote::DateModified)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vote_rating")
                            .from(Vote::Table, Vote::RatingId)
                            .to(Rating::Table, Rating::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One vote per member per rating, one vote per guest IP per rating.
        // Partial indexes because guests share user_id = 0.
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_vote_rating_member
                ON vote (rating_id, user_id)
                WHERE user_id <> 0;
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_vote_rating_guest
                ON vote (rating_id, user_ip)
                WHERE user_id = 0;
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                ALTER TABLE vote
                ADD CONSTRAINT chk_vote_guest_ip
                CHECK (user_id <> 0 OR user_ip IS NOT NULL);
                ",
            )
            .await?;

        // Index: voter + date_modified (rate-limit window queries)
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_voter_modified")
                    .table(Vote::Table)
                    .col(Vote::UserId)
                    .col(Vote::UserIp)
                    .col(Vote::DateModified)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Vote::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Vote {
    Table,
    Id,
    RatingId,
    UserId,
    UserIp,
    RatingValue,
    DateCreated,
    DateModified,
}

#[derive(Iden)]
enum Rating {
    Table,
    Id,
}
