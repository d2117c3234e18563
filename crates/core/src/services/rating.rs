//! Rating store service.
//!
//! CRUD over ratings plus the resolved read model: a mirror is shown under
//! its own name with the totals of its source.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use sea_orm::{ConnectionTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use shuriken_common::{AppError, AppResult, Clock, IdGenerator, VotingConfig};
use shuriken_db::{
    entities::{EffectType, rating},
    repositories::{RatingRepository, VoteRepository},
};
use validator::Validate;

use crate::services::aggregation::AggregationEngine;
use crate::services::event_publisher::{EventPublisherService, RatingEvent, publish_or_warn};
use crate::services::ledger::VoteLedger;

/// Input for creating a rating.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateRatingInput {
    #[validate(length(min = 1, max = 191))]
    pub name: String,
    pub parent_id: Option<String>,
    pub effect_type: Option<EffectType>,
    #[serde(default)]
    pub display_only: bool,
    pub mirror_of: Option<String>,
}

/// Input for updating a rating. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRatingInput {
    #[validate(length(min = 1, max = 191))]
    pub name: Option<String>,
    pub parent_id: Option<Option<String>>,
    pub effect_type: Option<EffectType>,
    pub display_only: Option<bool>,
    pub mirror_of: Option<Option<String>>,
}

/// Paging and search for [`RatingStore::list`].
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ListRatingsParams {
    #[validate(range(min = 1))]
    #[serde(default = "default_page")]
    pub page: u64,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    pub search: Option<String>,
}

const fn default_page() -> u64 {
    1
}

const fn default_per_page() -> u64 {
    20
}

impl Default for ListRatingsParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
            search: None,
        }
    }
}

/// A rating as callers see it, with mirrors resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingView {
    pub id: String,
    pub name: String,
    pub total_votes: i64,
    pub total_rating: i64,
    pub average: f64,
    pub parent_id: Option<String>,
    pub effect_type: EffectType,
    pub display_only: bool,
    pub mirror_of: Option<String>,
    /// Rating that votes for this one must target.
    pub source_id: String,
    pub date_created: DateTime<FixedOffset>,
}

impl RatingView {
    /// Build a view of `model`, taking vote data from `source` when given.
    #[must_use]
    pub fn resolve(model: &rating::Model, source: Option<&rating::Model>) -> Self {
        let totals_from = source.unwrap_or(model);
        Self {
            id: model.id.clone(),
            name: model.name.clone(),
            total_votes: totals_from.total_votes,
            total_rating: totals_from.total_rating,
            average: totals_from.average(),
            parent_id: model.parent_id.clone(),
            effect_type: model.effect_type,
            display_only: model.display_only,
            mirror_of: model.mirror_of.clone(),
            source_id: model.source_id().to_string(),
            date_created: model.date_created,
        }
    }
}

impl From<&rating::Model> for RatingView {
    fn from(model: &rating::Model) -> Self {
        Self::resolve(model, None)
    }
}

/// One page of ratings.
#[derive(Debug, Clone, Serialize)]
pub struct RatingPage {
    pub items: Vec<RatingView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Store-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatingStats {
    pub total_ratings: u64,
    pub total_votes: u64,
}

/// What a delete changed besides removing the rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingDeletion {
    pub detached_children: u64,
    pub detached_mirrors: u64,
    pub removed_votes: u64,
}

/// Service for managing ratings.
#[derive(Clone)]
pub struct RatingStore {
    rating_repo: RatingRepository,
    vote_repo: VoteRepository,
    ledger: VoteLedger,
    aggregation: AggregationEngine,
    voting: VotingConfig,
    clock: Arc<dyn Clock>,
    event_publisher: Option<EventPublisherService>,
    id_gen: IdGenerator,
}

impl RatingStore {
    /// Create a new rating store.
    #[must_use]
    pub fn new(
        rating_repo: RatingRepository,
        vote_repo: VoteRepository,
        ledger: VoteLedger,
        aggregation: AggregationEngine,
        voting: VotingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rating_repo,
            vote_repo,
            ledger,
            aggregation,
            voting,
            clock,
            event_publisher: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, event_publisher: EventPublisherService) {
        self.event_publisher = Some(event_publisher);
    }

    /// Create a rating.
    pub async fn create(&self, input: CreateRatingInput) -> AppResult<RatingView> {
        input.validate()?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name must not be blank".to_string()));
        }

        check_shape(
            input.parent_id.as_deref(),
            input.mirror_of.as_deref(),
            input.display_only,
        )?;

        // Referenced ratings stay locked until the insert commits
        let txn = self.rating_repo.connection().begin().await?;

        if let Some(ref parent_id) = input.parent_id {
            let parent = self.rating_repo.lock_by_id_in(&txn, parent_id).await?;
            // Display-only parents are accepted; only mirrors are refused
            ensure_parent_candidate(&parent)?;
        }

        let source = match input.mirror_of {
            Some(ref source_id) => {
                let source = self.rating_repo.lock_by_id_in(&txn, source_id).await?;
                ensure_mirror_source(&source)?;
                Some(source)
            }
            None => None,
        };

        let model = rating::ActiveModel {
            id: Set(self.id_gen.generate()),
            name: Set(name.to_string()),
            total_votes: Set(0),
            total_rating: Set(0),
            parent_id: Set(input.parent_id.clone()),
            effect_type: Set(input.effect_type.unwrap_or_default()),
            display_only: Set(input.display_only),
            mirror_of: Set(input.mirror_of.clone()),
            date_created: Set(self.clock.now().fixed_offset()),
        };

        let created = self.rating_repo.create_in(&txn, model).await?;
        txn.commit().await?;
        tracing::info!(rating_id = %created.id, name = %created.name, "Created rating");

        if created.parent_id.is_some() {
            self.aggregation.recompute_ancestors(&created).await?;
        }

        Ok(RatingView::resolve(&created, source.as_ref()))
    }

    /// Get a rating, resolving mirrors.
    pub async fn get(&self, id: &str) -> AppResult<RatingView> {
        let model = self.rating_repo.get_by_id(id).await?;
        self.resolve(&model).await
    }

    /// Resolve an already loaded rating.
    pub async fn resolve(&self, model: &rating::Model) -> AppResult<RatingView> {
        match model.mirror_of {
            Some(ref source_id) => {
                let source = self.rating_repo.get_by_id(source_id).await?;
                Ok(RatingView::resolve(model, Some(&source)))
            }
            None => Ok(RatingView::from(model)),
        }
    }

    /// Get several ratings. Unknown IDs are skipped.
    pub async fn get_many(&self, ids: &[String]) -> AppResult<Vec<RatingView>> {
        let models = self.rating_repo.find_by_ids(ids).await?;
        self.resolve_many(models).await
    }

    async fn resolve_many(&self, models: Vec<rating::Model>) -> AppResult<Vec<RatingView>> {
        let loaded: HashSet<&str> = models.iter().map(|m| m.id.as_str()).collect();
        let missing: Vec<String> = models
            .iter()
            .filter_map(|m| m.mirror_of.as_deref())
            .filter(|source_id| !loaded.contains(source_id))
            .map(ToString::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let extra = self.rating_repo.find_by_ids(&missing).await?;
        let by_id: HashMap<&str, &rating::Model> = models
            .iter()
            .chain(extra.iter())
            .map(|m| (m.id.as_str(), m))
            .collect();

        Ok(models
            .iter()
            .map(|m| {
                let source = m
                    .mirror_of
                    .as_deref()
                    .and_then(|source_id| by_id.get(source_id).copied());
                RatingView::resolve(m, source)
            })
            .collect())
    }

    /// Update a rating.
    ///
    /// Moving a rating between parents recomputes both the old and the new
    /// parent chain.
    pub async fn update(&self, id: &str, input: UpdateRatingInput) -> AppResult<RatingView> {
        input.validate()?;

        let txn = self.rating_repo.connection().begin().await?;
        let current = self.rating_repo.lock_by_id_in(&txn, id).await?;

        let parent_id = input
            .parent_id
            .clone()
            .unwrap_or_else(|| current.parent_id.clone());
        let mirror_of = input
            .mirror_of
            .clone()
            .unwrap_or_else(|| current.mirror_of.clone());
        let display_only = input.display_only.unwrap_or(current.display_only);
        let effect_type = input.effect_type.unwrap_or(current.effect_type);

        check_shape(parent_id.as_deref(), mirror_of.as_deref(), display_only)?;

        let parent_changed = parent_id != current.parent_id;
        if parent_changed {
            if let Some(ref new_parent_id) = parent_id {
                let parent = self.rating_repo.lock_by_id_in(&txn, new_parent_id).await?;
                ensure_parent_candidate(&parent)?;
                self.ensure_not_ancestor(&txn, id, &parent).await?;
            }
        }

        if mirror_of != current.mirror_of {
            if let Some(ref source_id) = mirror_of {
                if source_id == id {
                    return Err(AppError::InvalidTopology(format!(
                        "rating {id} cannot mirror itself"
                    )));
                }
                let source = self.rating_repo.lock_by_id_in(&txn, source_id).await?;
                ensure_mirror_source(&source)?;
                if !current.is_mirror() {
                    self.ensure_convertible_to_mirror(&txn, id).await?;
                }
            }
        }

        let mut active: rating::ActiveModel = current.clone().into();
        if let Some(name) = input.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::Validation("name must not be blank".to_string()));
            }
            active.name = Set(name);
        }
        active.parent_id = Set(parent_id);
        active.mirror_of = Set(mirror_of);
        active.display_only = Set(display_only);
        active.effect_type = Set(effect_type);

        let updated = self.rating_repo.update_in(&txn, active).await?;
        txn.commit().await?;

        tracing::info!(rating_id = %id, "Updated rating");

        if parent_changed {
            if let Some(ref old_parent_id) = current.parent_id {
                self.refresh_former_parent(old_parent_id).await?;
            }
        }
        if updated.parent_id.is_some() && (parent_changed || effect_type != current.effect_type) {
            self.aggregation.recompute_ancestors(&updated).await?;
        }

        self.resolve(&updated).await
    }

    /// Delete a rating.
    ///
    /// Children and mirrors become standalone ratings, the rating's votes
    /// are removed, and its former parent is recomputed.
    pub async fn delete(&self, id: &str) -> AppResult<RatingDeletion> {
        let txn = self.rating_repo.connection().begin().await?;

        let target = self.rating_repo.lock_by_id_in(&txn, id).await?;
        let detached_children = self.rating_repo.detach_children_in(&txn, id).await?;
        let detached_mirrors = self.rating_repo.detach_mirrors_in(&txn, id).await?;
        let removed_votes = self.vote_repo.delete_by_rating_in(&txn, id).await?;
        self.rating_repo.delete_in(&txn, id).await?;

        txn.commit().await?;

        tracing::info!(
            rating_id = %id,
            detached_children,
            detached_mirrors,
            removed_votes,
            "Deleted rating"
        );

        if let Some(ref parent_id) = target.parent_id {
            self.refresh_former_parent(parent_id).await?;
        }

        if let Some(ref publisher) = self.event_publisher {
            publish_or_warn(
                publisher,
                RatingEvent::RatingDeleted {
                    rating_id: id.to_string(),
                    detached_children,
                    detached_mirrors,
                },
            )
            .await;
        }

        Ok(RatingDeletion {
            detached_children,
            detached_mirrors,
            removed_votes,
        })
    }

    /// List the direct children of a rating.
    pub async fn list_children(&self, parent_id: &str) -> AppResult<Vec<RatingView>> {
        self.rating_repo.get_by_id(parent_id).await?;
        let children = self.rating_repo.find_children(parent_id).await?;
        Ok(children.iter().map(RatingView::from).collect())
    }

    /// List the mirrors of a rating, each showing the source's totals.
    pub async fn list_mirrors(&self, source_id: &str) -> AppResult<Vec<RatingView>> {
        let source = self.rating_repo.get_by_id(source_id).await?;
        let mirrors = self.rating_repo.find_mirrors(source_id).await?;
        Ok(mirrors
            .iter()
            .map(|m| RatingView::resolve(m, Some(&source)))
            .collect())
    }

    /// List ratings, newest first.
    pub async fn list(&self, params: ListRatingsParams) -> AppResult<RatingPage> {
        params.validate()?;

        let search = params.search.as_deref();
        let offset = (params.page - 1).saturating_mul(params.per_page);
        let models = self
            .rating_repo
            .list(search, params.per_page, offset)
            .await?;
        let total = self.rating_repo.count(search).await?;

        Ok(RatingPage {
            items: self.resolve_many(models).await?,
            total,
            page: params.page,
            per_page: params.per_page,
        })
    }

    /// Count ratings and votes.
    pub async fn stats(&self) -> AppResult<RatingStats> {
        Ok(RatingStats {
            total_ratings: self.rating_repo.count(None).await?,
            total_votes: self.vote_repo.count().await?,
        })
    }

    /// Number of votes per star value, `1..=max_value`, of the rating's source.
    pub async fn vote_distribution(&self, id: &str) -> AppResult<Vec<(i32, i64)>> {
        let model = self.rating_repo.get_by_id(id).await?;
        let counts: HashMap<i32, i64> = self
            .vote_repo
            .count_by_value(model.source_id())
            .await?
            .into_iter()
            .collect();

        Ok((1..=self.voting.max_value)
            .map(|value| (value, counts.get(&value).copied().unwrap_or(0)))
            .collect())
    }

    /// Bring a rating that may have lost a child back in line, then its ancestors.
    async fn refresh_former_parent(&self, parent_id: &str) -> AppResult<()> {
        let parent = if self.rating_repo.has_children(parent_id).await? {
            self.aggregation.recompute(parent_id).await?
        } else {
            // No children left: totals come from its own votes again
            self.ledger.resync_totals(parent_id).await?
        };
        self.aggregation.recompute_ancestors(&parent).await?;
        Ok(())
    }

    /// Fail if `id` is `parent` or one of its ancestors.
    ///
    /// Every ancestor is row locked on `conn`, so two updates that would
    /// close a cycle between them block each other instead of both passing.
    async fn ensure_not_ancestor<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        parent: &rating::Model,
    ) -> AppResult<()> {
        let mut visited = HashSet::new();
        let mut cursor = Some(parent.clone());

        while let Some(node) = cursor {
            if node.id == id {
                return Err(AppError::InvalidTopology(format!(
                    "rating {id} cannot be its own ancestor"
                )));
            }
            if !visited.insert(node.id.clone()) {
                return Err(AppError::InvalidTopology(format!(
                    "parent cycle detected at rating {}",
                    node.id
                )));
            }
            cursor = match node.parent_id {
                Some(ref next) if next == id => {
                    return Err(AppError::InvalidTopology(format!(
                        "rating {id} cannot be its own ancestor"
                    )));
                }
                Some(ref next) => Some(self.rating_repo.lock_by_id_in(conn, next).await?),
                None => None,
            };
        }

        Ok(())
    }

    /// Fail unless a standalone rating could become a mirror without losing data.
    async fn ensure_convertible_to_mirror<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> AppResult<()> {
        if self.rating_repo.has_children_in(conn, id).await? {
            return Err(AppError::InvalidTopology(format!(
                "rating {id} has children and cannot become a mirror"
            )));
        }
        if self.rating_repo.has_mirrors_in(conn, id).await? {
            return Err(AppError::InvalidTopology(format!(
                "rating {id} is mirrored and cannot become a mirror"
            )));
        }
        let (votes, _) = self.vote_repo.totals_for_rating_in(conn, id).await?;
        if votes > 0 {
            return Err(AppError::InvalidTopology(format!(
                "rating {id} has {votes} votes and cannot become a mirror"
            )));
        }
        Ok(())
    }
}

/// Field combinations a single rating may never have.
fn check_shape(
    parent_id: Option<&str>,
    mirror_of: Option<&str>,
    display_only: bool,
) -> AppResult<()> {
    if mirror_of.is_some() && parent_id.is_some() {
        return Err(AppError::InvalidTopology(
            "a mirror cannot have a parent".to_string(),
        ));
    }
    if mirror_of.is_some() && display_only {
        return Err(AppError::InvalidTopology(
            "a mirror cannot be display-only".to_string(),
        ));
    }
    Ok(())
}

/// Only mirrors are refused as parents. A display-only rating gets its
/// totals solely from children, so it must be able to have them.
fn ensure_parent_candidate(parent: &rating::Model) -> AppResult<()> {
    if parent.is_mirror() {
        return Err(AppError::InvalidTopology(format!(
            "mirror {} cannot be a parent",
            parent.id
        )));
    }
    Ok(())
}

fn ensure_mirror_source(source: &rating::Model) -> AppResult<()> {
    if source.is_mirror() {
        return Err(AppError::InvalidTopology(format!(
            "rating {} is itself a mirror",
            source.id
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
    use shuriken_common::ManualClock;

    fn create_test_rating(id: &str, total_votes: i64, total_rating: i64) -> rating::Model {
        rating::Model {
            id: id.to_string(),
            name: format!("Rating {id}"),
            total_votes,
            total_rating,
            parent_id: None,
            effect_type: EffectType::Positive,
            display_only: false,
            mirror_of: None,
            date_created: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap().into(),
        }
    }

    fn rows(n: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: n,
        }
    }

    fn store(db: MockDatabase) -> RatingStore {
        store_with_connection(db).0
    }

    fn store_with_connection(db: MockDatabase) -> (RatingStore, Arc<DatabaseConnection>) {
        let conn = Arc::new(db.into_connection());
        let shared = Arc::clone(&conn);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        ));
        let rating_repo = RatingRepository::new(conn.clone());
        let vote_repo = VoteRepository::new(conn);
        let voting = VotingConfig::default();
        let ledger = VoteLedger::new(
            rating_repo.clone(),
            vote_repo.clone(),
            voting.clone(),
            clock.clone(),
        );
        let aggregation = AggregationEngine::new(rating_repo.clone(), voting.clone());
        let store = RatingStore::new(rating_repo, vote_repo, ledger, aggregation, voting, clock);
        (store, shared)
    }

    /// SQL of every statement the store ran, grouped per transaction.
    fn statements(store: RatingStore, conn: Arc<DatabaseConnection>) -> Vec<Vec<String>> {
        drop(store);
        Arc::try_unwrap(conn)
            .ok()
            .unwrap()
            .into_transaction_log()
            .iter()
            .map(|txn| txn.statements().iter().map(|stmt| stmt.sql.clone()).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_create_defaults_to_positive_standalone() {
        let mut stored = create_test_rating("r1", 0, 0);
        stored.name = "Service".to_string();

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[stored]]),
        );

        let view = store
            .create(CreateRatingInput {
                name: "  Service ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(view.effect_type, EffectType::Positive);
        assert_eq!(view.parent_id, None);
        assert_eq!(view.source_id, "r1");
        assert!(view.average.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_name() {
        let store = store(MockDatabase::new(DatabaseBackend::Postgres));

        let result = store.create(CreateRatingInput::default()).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_mirror_parent() {
        let mut mirror = create_test_rating("m1", 0, 0);
        mirror.mirror_of = Some("src".to_string());

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[mirror]]),
        );

        let result = store
            .create(CreateRatingInput {
                name: "Child".to_string(),
                parent_id: Some("m1".to_string()),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(AppError::InvalidTopology(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_mirror_chain() {
        let mut mirror = create_test_rating("m1", 0, 0);
        mirror.mirror_of = Some("src".to_string());

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[mirror]]),
        );

        let result = store
            .create(CreateRatingInput {
                name: "Mirror of mirror".to_string(),
                mirror_of: Some("m1".to_string()),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(AppError::InvalidTopology(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_mirror_with_parent_without_lookups() {
        let store = store(MockDatabase::new(DatabaseBackend::Postgres));

        let result = store
            .create(CreateRatingInput {
                name: "Bad".to_string(),
                parent_id: Some("p1".to_string()),
                mirror_of: Some("s1".to_string()),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(AppError::InvalidTopology(_))));
    }

    #[tokio::test]
    async fn test_get_mirror_shows_source_totals_under_own_name() {
        let source = create_test_rating("src", 4, 17);
        let mut mirror = create_test_rating("m1", 0, 0);
        mirror.name = "Mirror".to_string();
        mirror.mirror_of = Some("src".to_string());

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[mirror]])
                .append_query_results([[source.clone()]]),
        );

        let view = store.get("m1").await.unwrap();

        assert_eq!(view.name, "Mirror");
        assert_eq!(view.total_votes, source.total_votes);
        assert_eq!(view.total_rating, source.total_rating);
        assert!((view.average - source.average()).abs() < f64::EPSILON);
        assert_eq!(view.source_id, "src");
    }

    #[tokio::test]
    async fn test_get_many_resolves_sources_not_requested() {
        let source = create_test_rating("src", 2, 9);
        let mut mirror = create_test_rating("m1", 0, 0);
        mirror.mirror_of = Some("src".to_string());
        let plain = create_test_rating("r1", 1, 3);

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[mirror, plain]])
                .append_query_results([[source]]),
        );

        let views = store
            .get_many(&["m1".to_string(), "r1".to_string()])
            .await
            .unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].total_votes, 2);
        assert_eq!(views[1].total_votes, 1);
    }

    #[tokio::test]
    async fn test_delete_parent_detaches_children() {
        let parent = create_test_rating("p1", 5, 18);

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[parent]])
                .append_exec_results([rows(2), rows(0), rows(3), rows(1)]),
        );

        let deletion = store.delete("p1").await.unwrap();

        assert_eq!(
            deletion,
            RatingDeletion {
                detached_children: 2,
                detached_mirrors: 0,
                removed_votes: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_delete_missing_rating() {
        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<rating::Model>::new()]),
        );

        let result = store.delete("ghost").await;

        assert!(matches!(result, Err(AppError::RatingNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_rejects_parent_cycle() {
        let a = create_test_rating("a", 0, 0);
        let mut b = create_test_rating("b", 0, 0);
        b.parent_id = Some("a".to_string());

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[a]])
                .append_query_results([[b]]),
        );

        let result = store
            .update(
                "a",
                UpdateRatingInput {
                    parent_id: Some(Some("b".to_string())),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::InvalidTopology(_))));
    }

    #[tokio::test]
    async fn test_update_rejects_parent_on_mirror() {
        let mut mirror = create_test_rating("m1", 0, 0);
        mirror.mirror_of = Some("src".to_string());

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[mirror]]),
        );

        let result = store
            .update(
                "m1",
                UpdateRatingInput {
                    parent_id: Some(Some("p1".to_string())),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::InvalidTopology(_))));
    }

    #[tokio::test]
    async fn test_update_rejects_mirror_conversion_with_children() {
        let current = create_test_rating("r1", 0, 0);
        let source = create_test_rating("src", 3, 12);

        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[current]])
                .append_query_results([[source]])
                .append_query_results([[maplit::btreemap! {
                    "num_items" => sea_orm::Value::BigInt(Some(1))
                }]]),
        );

        let result = store
            .update(
                "r1",
                UpdateRatingInput {
                    mirror_of: Some(Some("src".to_string())),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::InvalidTopology(_))));
    }

    #[tokio::test]
    async fn test_create_locks_parent_until_insert_commits() {
        let mut parent = create_test_rating("p1", 0, 0);
        parent.display_only = true;
        let mut child = create_test_rating("c1", 0, 0);
        child.parent_id = Some("p1".to_string());

        let (store, conn) = store_with_connection(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[parent.clone()]])
                .append_query_results([[child.clone()]])
                .append_query_results([[parent]])
                .append_query_results([[child]])
                .append_exec_results([rows(1)]),
        );

        let view = store
            .create(CreateRatingInput {
                name: "Child".to_string(),
                parent_id: Some("p1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(view.parent_id.as_deref(), Some("p1"));

        let log = statements(store, conn);
        let insert = &log[0];
        assert_eq!(insert.first().map(String::as_str), Some("BEGIN"));
        assert!(insert[1].starts_with("SELECT") && insert[1].ends_with("FOR UPDATE"));
        assert!(insert[2].starts_with("INSERT"));
        assert_eq!(insert.last().map(String::as_str), Some("COMMIT"));
    }

    #[tokio::test]
    async fn test_update_locks_new_parent_chain() {
        let a = create_test_rating("a", 0, 0);
        let mut b = create_test_rating("b", 0, 0);
        b.parent_id = Some("c".to_string());
        let mut c = create_test_rating("c", 0, 0);
        c.parent_id = Some("a".to_string());

        let (store, conn) = store_with_connection(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[a]])
                .append_query_results([[b]])
                .append_query_results([[c]]),
        );

        let result = store
            .update(
                "a",
                UpdateRatingInput {
                    parent_id: Some(Some("b".to_string())),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidTopology(_))));

        let log = statements(store, conn);
        assert_eq!(log.len(), 1);
        let selects: Vec<_> = log[0].iter().filter(|sql| sql.starts_with("SELECT")).collect();
        assert_eq!(selects.len(), 3);
        assert!(selects.iter().all(|sql| sql.ends_with("FOR UPDATE")));
        assert_eq!(log[0].last().map(String::as_str), Some("ROLLBACK"));
    }

    #[tokio::test]
    async fn test_update_checks_mirror_conversion_inside_transaction() {
        let current = create_test_rating("r1", 0, 0);
        let source = create_test_rating("src", 3, 12);

        let (store, conn) = store_with_connection(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[current]])
                .append_query_results([[source]])
                .append_query_results([[maplit::btreemap! {
                    "num_items" => sea_orm::Value::BigInt(Some(0))
                }]])
                .append_query_results([[maplit::btreemap! {
                    "num_items" => sea_orm::Value::BigInt(Some(1))
                }]]),
        );

        let result = store
            .update(
                "r1",
                UpdateRatingInput {
                    mirror_of: Some(Some("src".to_string())),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidTopology(_))));

        let log = statements(store, conn);
        assert_eq!(log.len(), 1);
        let txn = &log[0];
        assert_eq!(txn.first().map(String::as_str), Some("BEGIN"));
        assert!(txn[1].ends_with("FOR UPDATE"));
        assert!(txn[2].ends_with("FOR UPDATE"));
        assert_eq!(txn.iter().filter(|sql| sql.contains("COUNT")).count(), 2);
        assert_eq!(txn.last().map(String::as_str), Some("ROLLBACK"));
    }

    #[tokio::test]
    async fn test_vote_distribution_zero_fills() {
        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_rating("r1", 4, 19)]])
                .append_query_results([[
                    maplit::btreemap! {
                        "rating_value" => sea_orm::Value::Int(Some(4)),
                        "votes" => sea_orm::Value::BigInt(Some(3)),
                    },
                    maplit::btreemap! {
                        "rating_value" => sea_orm::Value::Int(Some(5)),
                        "votes" => sea_orm::Value::BigInt(Some(1)),
                    },
                ]]),
        );

        let distribution = store.vote_distribution("r1").await.unwrap();

        assert_eq!(distribution, vec![(1, 0), (2, 0), (3, 0), (4, 3), (5, 1)]);
    }

    #[tokio::test]
    async fn test_list_rejects_oversized_page() {
        let store = store(MockDatabase::new(DatabaseBackend::Postgres));

        let result = store
            .list(ListRatingsParams {
                per_page: 500,
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let count = |n: i64| {
            maplit::btreemap! { "num_items" => sea_orm::Value::BigInt(Some(n)) }
        };
        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count(12)]])
                .append_query_results([[count(340)]]),
        );

        let stats = store.stats().await.unwrap();

        assert_eq!(
            stats,
            RatingStats {
                total_ratings: 12,
                total_votes: 340,
            }
        );
    }
}
