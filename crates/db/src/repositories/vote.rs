//! Vote repository.

use std::sync::Arc;

use crate::entities::{Vote, vote};
use chrono::{DateTime, FixedOffset};
use sea_orm::sea_query::{Alias, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use shuriken_common::{AppError, AppResult, Voter};

/// Vote repository for database operations.
#[derive(Clone)]
pub struct VoteRepository {
    db: Arc<DatabaseConnection>,
}

/// Condition selecting one voter's rows: the user id, plus the IP for guests.
fn voter_condition(voter: &Voter) -> Condition {
    let cond = Condition::all().add(vote::Column::UserId.eq(voter.user_id()));
    match voter.ip() {
        Some(ip) => cond.add(vote::Column::UserIp.eq(ip)),
        None => cond,
    }
}

impl VoteRepository {
    /// Create a new vote repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The shared connection, for opening transactions.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Find a vote by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<vote::Model>> {
        Vote::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a vote by ID on the given connection, returning error if not found.
    pub async fn get_by_id_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> AppResult<vote::Model> {
        Vote::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::VoteNotFound(id.to_string()))
    }

    /// Find a voter's vote on a rating.
    pub async fn find_by_rating_and_voter(
        &self,
        rating_id: &str,
        voter: &Voter,
    ) -> AppResult<Option<vote::Model>> {
        self.find_by_rating_and_voter_in(self.db.as_ref(), rating_id, voter)
            .await
    }

    /// Find a voter's vote on a rating on the given connection.
    pub async fn find_by_rating_and_voter_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        rating_id: &str,
        voter: &Voter,
    ) -> AppResult<Option<vote::Model>> {
        Vote::find()
            .filter(vote::Column::RatingId.eq(rating_id))
            .filter(voter_condition(voter))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a voter's votes touched at or after `since`, oldest first.
    pub async fn find_by_voter_since(
        &self,
        voter: &Voter,
        since: DateTime<FixedOffset>,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(voter_condition(voter))
            .filter(vote::Column::DateModified.gte(since))
            .order_by_asc(vote::Column::DateModified)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a voter's most recent votes.
    pub async fn find_recent_by_voter(
        &self,
        voter: &Voter,
        limit: u64,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(voter_condition(voter))
            .order_by_desc(vote::Column::DateModified)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count all votes.
    pub async fn count(&self) -> AppResult<u64> {
        Vote::find()
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count the votes of a rating per vote value.
    pub async fn count_by_value(&self, rating_id: &str) -> AppResult<Vec<(i32, i64)>> {
        Vote::find()
            .filter(vote::Column::RatingId.eq(rating_id))
            .select_only()
            .column(vote::Column::RatingValue)
            .column_as(vote::Column::Id.count(), "votes")
            .group_by(vote::Column::RatingValue)
            .order_by_asc(vote::Column::RatingValue)
            .into_tuple::<(i32, i64)>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Vote count and value sum of a rating's own ledger, on the given connection.
    pub async fn totals_for_rating_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        rating_id: &str,
    ) -> AppResult<(i64, i64)> {
        let row = Vote::find()
            .filter(vote::Column::RatingId.eq(rating_id))
            .select_only()
            .column_as(vote::Column::Id.count(), "vote_count")
            .column_as(
                Expr::expr(vote::Column::RatingValue.sum()).cast_as(Alias::new("BIGINT")),
                "vote_sum",
            )
            .into_tuple::<(i64, Option<i64>)>()
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map_or((0, 0), |(count, sum)| (count, sum.unwrap_or(0))))
    }

    /// Insert a vote on the given connection.
    pub async fn insert_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: vote::ActiveModel,
    ) -> AppResult<vote::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Replace an existing vote's value on the given connection.
    pub async fn update_value_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        existing: vote::Model,
        rating_value: i32,
        modified_at: DateTime<FixedOffset>,
    ) -> AppResult<vote::Model> {
        let mut active: vote::ActiveModel = existing.into();
        active.rating_value = Set(rating_value);
        active.date_modified = Set(modified_at);

        active
            .update(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a vote on the given connection.
    pub async fn delete_in<C: ConnectionTrait>(&self, conn: &C, id: &str) -> AppResult<()> {
        let result = Vote::delete_by_id(id)
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::VoteNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete every vote of a rating on the given connection.
    pub async fn delete_by_rating_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        rating_id: &str,
    ) -> AppResult<u64> {
        let result = Vote::delete_many()
            .filter(vote::Column::RatingId.eq(rating_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
