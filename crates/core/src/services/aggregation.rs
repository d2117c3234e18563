//! Aggregation engine.
//!
//! A parent's totals are always a fresh sum over its children, never an
//! increment of the previous value. Each recomputation runs in its own
//! transaction that row-locks the parent first, so concurrent
//! recomputations of one parent are serialized and the last to commit has
//! read committed sibling totals.

use std::collections::HashSet;

use sea_orm::TransactionTrait;
use shuriken_common::{AppError, AppResult, VotingConfig};
use shuriken_db::{
    entities::{EffectType, rating},
    repositories::RatingRepository,
};

use crate::services::event_publisher::{EventPublisherService, RatingEvent, publish_or_warn};

/// Vote count and vote sum of a rating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub total_votes: i64,
    pub total_rating: i64,
}

impl Totals {
    /// Totals currently stored on a rating.
    #[must_use]
    pub const fn of(model: &rating::Model) -> Self {
        Self {
            total_votes: model.total_votes,
            total_rating: model.total_rating,
        }
    }
}

/// Sum the contributions of `children` to their parent.
///
/// A negative-effect child contributes `votes * inversion_constant - sum`,
/// so each of its votes `v` counts as `inversion_constant - v`.
#[must_use]
pub fn aggregate_children(children: &[rating::Model], inversion_constant: i64) -> Totals {
    children
        .iter()
        .filter(|child| child.total_votes > 0)
        .fold(Totals::default(), |acc, child| {
            let contribution = match child.effect_type {
                EffectType::Positive => child.total_rating,
                EffectType::Negative => {
                    child.total_votes * inversion_constant - child.total_rating
                }
            };
            Totals {
                total_votes: acc.total_votes + child.total_votes,
                total_rating: acc.total_rating + contribution,
            }
        })
}

/// Recomputes parent ratings from their children.
#[derive(Clone)]
pub struct AggregationEngine {
    rating_repo: RatingRepository,
    voting: VotingConfig,
    event_publisher: Option<EventPublisherService>,
}

impl AggregationEngine {
    /// Create a new aggregation engine.
    #[must_use]
    pub const fn new(rating_repo: RatingRepository, voting: VotingConfig) -> Self {
        Self {
            rating_repo,
            voting,
            event_publisher: None,
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, event_publisher: EventPublisherService) {
        self.event_publisher = Some(event_publisher);
    }

    /// Overwrite a parent's totals with the sum over its current children.
    ///
    /// Returns the parent as stored afterwards. A rating without children
    /// is returned untouched.
    pub async fn recompute(&self, parent_id: &str) -> AppResult<rating::Model> {
        let txn = self.rating_repo.connection().begin().await?;

        let mut parent = self.rating_repo.lock_by_id_in(&txn, parent_id).await?;
        let children = self.rating_repo.find_children_in(&txn, parent_id).await?;

        if children.is_empty() {
            txn.commit().await?;
            tracing::debug!(rating_id = %parent_id, "No children, nothing to aggregate");
            return Ok(parent);
        }

        let totals = aggregate_children(&children, self.voting.inversion_constant());
        self.rating_repo
            .set_totals_in(&txn, parent_id, totals.total_votes, totals.total_rating)
            .await?;
        txn.commit().await?;

        parent.total_votes = totals.total_votes;
        parent.total_rating = totals.total_rating;

        tracing::info!(
            rating_id = %parent_id,
            children = children.len(),
            total_votes = totals.total_votes,
            total_rating = totals.total_rating,
            "Recomputed parent rating"
        );

        if let Some(ref publisher) = self.event_publisher {
            publish_or_warn(
                publisher,
                RatingEvent::RatingRecomputed {
                    rating_id: parent_id.to_string(),
                    total_votes: totals.total_votes,
                    total_rating: totals.total_rating,
                },
            )
            .await;
        }

        Ok(parent)
    }

    /// Recompute every ancestor of `rating_id`, nearest first.
    ///
    /// Returns the recomputed ancestors in the same order.
    pub async fn recompute_chain(&self, rating_id: &str) -> AppResult<Vec<rating::Model>> {
        let start = self.rating_repo.get_by_id(rating_id).await?;
        self.recompute_ancestors(&start).await
    }

    /// Recompute every ancestor of an already loaded rating, nearest first.
    pub async fn recompute_ancestors(
        &self,
        rating: &rating::Model,
    ) -> AppResult<Vec<rating::Model>> {
        let mut visited = HashSet::from([rating.id.clone()]);
        let mut updated = Vec::new();
        let mut next = rating.parent_id.clone();

        while let Some(parent_id) = next {
            if !visited.insert(parent_id.clone()) {
                return Err(AppError::InvalidTopology(format!(
                    "parent cycle detected at rating {parent_id}"
                )));
            }
            let parent = self.recompute(&parent_id).await?;
            next = parent.parent_id.clone();
            updated.push(parent);
        }

        Ok(updated)
    }

    /// Recompute every rating that has children, and their ancestors.
    ///
    /// Returns the number of parents recomputed.
    pub async fn recompute_all(&self) -> AppResult<usize> {
        let parent_ids = self.rating_repo.find_parent_ids().await?;
        let mut recomputed = 0;

        for parent_id in &parent_ids {
            let parent = self.recompute(parent_id).await?;
            recomputed += 1 + self.recompute_ancestors(&parent).await?.len();
        }

        tracing::info!(
            parents = parent_ids.len(),
            recomputed,
            "Recomputed all parent ratings"
        );
        Ok(recomputed)
    }
}
