//! Rating repository.
//!
//! Methods suffixed `_in` take an explicit connection so services can run
//! them inside a transaction; the rest use the shared pool.

use std::sync::Arc;

use crate::entities::{Rating, rating};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use shuriken_common::{AppError, AppResult};

/// Rating repository for database operations.
#[derive(Clone)]
pub struct RatingRepository {
    db: Arc<DatabaseConnection>,
}

impl RatingRepository {
    /// Create a new rating repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The shared connection, for opening transactions.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Find a rating by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<rating::Model>> {
        self.find_by_id_in(self.db.as_ref(), id).await
    }

    /// Find a rating by ID on the given connection.
    pub async fn find_by_id_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> AppResult<Option<rating::Model>> {
        Rating::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a rating by ID, returning error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<rating::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::RatingNotFound(id.to_string()))
    }

    /// Load a rating and hold its row lock until the transaction ends.
    pub async fn lock_by_id_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> AppResult<rating::Model> {
        Rating::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::RatingNotFound(id.to_string()))
    }

    /// Find several ratings. Unknown IDs are skipped.
    pub async fn find_by_ids(&self, ids: &[String]) -> AppResult<Vec<rating::Model>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        Rating::find()
            .filter(rating::Column::Id.is_in(ids.iter().map(String::as_str)))
            .order_by_asc(rating::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get the direct children of a rating.
    pub async fn find_children(&self, parent_id: &str) -> AppResult<Vec<rating::Model>> {
        self.find_children_in(self.db.as_ref(), parent_id).await
    }

    /// Get the direct children of a rating on the given connection.
    pub async fn find_children_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: &str,
    ) -> AppResult<Vec<rating::Model>> {
        Rating::find()
            .filter(rating::Column::ParentId.eq(parent_id))
            .order_by_asc(rating::Column::Id)
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Check whether a rating has any children.
    pub async fn has_children(&self, parent_id: &str) -> AppResult<bool> {
        self.has_children_in(self.db.as_ref(), parent_id).await
    }

    /// Check whether a rating has any children on the given connection.
    pub async fn has_children_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: &str,
    ) -> AppResult<bool> {
        let count = Rating::find()
            .filter(rating::Column::ParentId.eq(parent_id))
            .count(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Get the ratings mirroring a source rating.
    pub async fn find_mirrors(&self, source_id: &str) -> AppResult<Vec<rating::Model>> {
        Rating::find()
            .filter(rating::Column::MirrorOf.eq(source_id))
            .order_by_asc(rating::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Check whether any rating mirrors the given one.
    pub async fn has_mirrors(&self, source_id: &str) -> AppResult<bool> {
        self.has_mirrors_in(self.db.as_ref(), source_id).await
    }

    /// Check whether any rating mirrors the given one on the given connection.
    pub async fn has_mirrors_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        source_id: &str,
    ) -> AppResult<bool> {
        let count = Rating::find()
            .filter(rating::Column::MirrorOf.eq(source_id))
            .count(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// IDs of every rating that currently has at least one child.
    pub async fn find_parent_ids(&self) -> AppResult<Vec<String>> {
        let ids = Rating::find()
            .filter(rating::Column::ParentId.is_not_null())
            .select_only()
            .column(rating::Column::ParentId)
            .distinct()
            .into_tuple::<Option<String>>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(ids.into_iter().flatten().collect())
    }

    /// List ratings, newest first, optionally filtered by a case-insensitive name fragment.
    pub async fn list(
        &self,
        search: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<rating::Model>> {
        let mut query = Rating::find();

        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            query = query.filter(
                Expr::expr(Func::lower(Expr::col(rating::Column::Name)))
                    .like(like_pattern(term)),
            );
        }

        query
            .order_by_desc(rating::Column::DateCreated)
            .order_by_desc(rating::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count ratings matching the same filter as [`Self::list`].
    pub async fn count(&self, search: Option<&str>) -> AppResult<u64> {
        let mut query = Rating::find();

        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            query = query.filter(
                Expr::expr(Func::lower(Expr::col(rating::Column::Name)))
                    .like(like_pattern(term)),
            );
        }

        query
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new rating.
    pub async fn create(&self, model: rating::ActiveModel) -> AppResult<rating::Model> {
        self.create_in(self.db.as_ref(), model).await
    }

    /// Create a new rating on the given connection.
    pub async fn create_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: rating::ActiveModel,
    ) -> AppResult<rating::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a rating on the given connection.
    pub async fn update_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: rating::ActiveModel,
    ) -> AppResult<rating::Model> {
        model
            .update(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Shift a rating's totals atomically (single UPDATE, no fetch).
    pub async fn apply_delta_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        votes_delta: i64,
        rating_delta: i64,
    ) -> AppResult<()> {
        let result = Rating::update_many()
            .col_expr(
                rating::Column::TotalVotes,
                Expr::col(rating::Column::TotalVotes).add(votes_delta),
            )
            .col_expr(
                rating::Column::TotalRating,
                Expr::col(rating::Column::TotalRating).add(rating_delta),
            )
            .filter(rating::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::RatingNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Overwrite a rating's totals.
    pub async fn set_totals_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        total_votes: i64,
        total_rating: i64,
    ) -> AppResult<()> {
        let result = Rating::update_many()
            .col_expr(rating::Column::TotalVotes, Expr::value(total_votes))
            .col_expr(rating::Column::TotalRating, Expr::value(total_rating))
            .filter(rating::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::RatingNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Promote every child of `parent_id` to a standalone rating.
    pub async fn detach_children_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: &str,
    ) -> AppResult<u64> {
        let result = Rating::update_many()
            .col_expr(rating::Column::ParentId, Expr::value(Option::<String>::None))
            .filter(rating::Column::ParentId.eq(parent_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Turn every mirror of `source_id` into a standalone rating.
    pub async fn detach_mirrors_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        source_id: &str,
    ) -> AppResult<u64> {
        let result = Rating::update_many()
            .col_expr(rating::Column::MirrorOf, Expr::value(Option::<String>::None))
            .filter(rating::Column::MirrorOf.eq(source_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Delete a rating on the given connection.
    pub async fn delete_in<C: ConnectionTrait>(&self, conn: &C, id: &str) -> AppResult<()> {
        let result = Rating::delete_by_id(id)
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::RatingNotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Lowercased `LIKE` pattern matching `term` anywhere, with wildcards escaped.
fn like_pattern(term: &str) -> String {
    format!(
        "%{}%",
        term.to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_")
    )
}
