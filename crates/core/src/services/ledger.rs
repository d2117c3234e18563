//! Vote ledger.
//!
//! Every write pairs the vote row change with the matching delta on the
//! rating's totals inside one transaction. The ledger knows nothing about
//! hierarchy; callers recompute ancestors after a successful write.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Set, TransactionTrait};
use shuriken_common::{AppError, AppResult, Clock, IdGenerator, Voter, VotingBlock, VotingConfig};
use shuriken_db::{
    entities::{rating, vote},
    repositories::{RatingRepository, VoteRepository},
};

use crate::services::event_publisher::{EventPublisherService, RatingEvent, publish_or_warn};

/// Maximum number of votes returned by [`VoteLedger::voter_history`].
const MAX_HISTORY: u64 = 100;

/// Result of [`VoteLedger::record`].
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    /// The vote as stored.
    pub vote: vote::Model,
    /// Value the voter had before, if this replaced an earlier vote.
    pub previous_value: Option<i32>,
    /// The voted rating with its updated totals.
    pub rating: rating::Model,
}

impl VoteOutcome {
    /// Whether an earlier vote was replaced rather than a new one inserted.
    #[must_use]
    pub const fn is_update(&self) -> bool {
        self.previous_value.is_some()
    }
}

/// Check that a rating accepts direct votes.
pub fn ensure_votable(rating: &rating::Model, has_children: bool) -> AppResult<()> {
    let reason = if rating.is_mirror() {
        VotingBlock::Mirror
    } else if rating.display_only {
        VotingBlock::DisplayOnly
    } else if has_children {
        VotingBlock::Parent
    } else {
        return Ok(());
    };

    Err(AppError::VotingNotAllowed {
        rating_id: rating.id.clone(),
        reason,
    })
}

/// Durable per-voter vote records.
#[derive(Clone)]
pub struct VoteLedger {
    rating_repo: RatingRepository,
    vote_repo: VoteRepository,
    voting: VotingConfig,
    clock: Arc<dyn Clock>,
    event_publisher: Option<EventPublisherService>,
    id_gen: IdGenerator,
}

impl VoteLedger {
    /// Create a new vote ledger.
    #[must_use]
    pub fn new(
        rating_repo: RatingRepository,
        vote_repo: VoteRepository,
        voting: VotingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rating_repo,
            vote_repo,
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

    /// Check a vote value against the configured scale.
    pub fn validate_value(&self, value: i32) -> AppResult<()> {
        if (1..=self.voting.max_value).contains(&value) {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "vote value must be between 1 and {}, got {value}",
                self.voting.max_value
            )))
        }
    }

    /// Find a voter's vote on a rating.
    pub async fn find_vote(&self, rating_id: &str, voter: &Voter) -> AppResult<Option<vote::Model>> {
        self.vote_repo.find_by_rating_and_voter(rating_id, voter).await
    }

    /// Insert or replace a voter's vote on a rating, adjusting its totals.
    ///
    /// A first vote adds one vote and `value` to the totals; a repeat vote
    /// keeps the vote count and shifts the sum by `value - previous`.
    pub async fn record(
        &self,
        rating_id: &str,
        value: i32,
        voter: &Voter,
    ) -> AppResult<VoteOutcome> {
        self.validate_value(value)?;

        let txn = self.rating_repo.connection().begin().await?;

        // Row lock serializes writers on this rating until commit
        let mut target = self.rating_repo.lock_by_id_in(&txn, rating_id).await?;
        let has_children = self.rating_repo.has_children_in(&txn, rating_id).await?;
        ensure_votable(&target, has_children)?;

        let now = self.clock.now().fixed_offset();
        let existing = self
            .vote_repo
            .find_by_rating_and_voter_in(&txn, rating_id, voter)
            .await?;

        let (stored, previous_value, votes_delta, rating_delta) = match existing {
            Some(old) => {
                let previous = old.rating_value;
                let stored = self
                    .vote_repo
                    .update_value_in(&txn, old, value, now)
                    .await?;
                (stored, Some(previous), 0, i64::from(value - previous))
            }
            None => {
                let model = vote::ActiveModel {
                    id: Set(self.id_gen.generate()),
                    rating_id: Set(rating_id.to_string()),
                    user_id: Set(voter.user_id()),
                    user_ip: Set(voter.ip().map(ToString::to_string)),
                    rating_value: Set(value),
                    date_created: Set(now),
                    date_modified: Set(now),
                };
                let stored = self.vote_repo.insert_in(&txn, model).await?;
                (stored, None, 1, i64::from(value))
            }
        };

        self.rating_repo
            .apply_delta_in(&txn, rating_id, votes_delta, rating_delta)
            .await?;
        txn.commit().await?;

        target.total_votes += votes_delta;
        target.total_rating += rating_delta;

        tracing::info!(
            rating_id = %rating_id,
            voter = %voter,
            value,
            previous = ?previous_value,
            "Recorded vote"
        );

        if let Some(ref publisher) = self.event_publisher {
            publish_or_warn(
                publisher,
                RatingEvent::VoteRecorded {
                    rating_id: rating_id.to_string(),
                    voter: voter.clone(),
                    value,
                    previous_value,
                },
            )
            .await;
        }

        Ok(VoteOutcome {
            vote: stored,
            previous_value,
            rating: target,
        })
    }

    /// Remove a single vote and subtract it from its rating's totals.
    ///
    /// Returns the rating with its updated totals.
    pub async fn delete_vote(&self, vote_id: &str) -> AppResult<rating::Model> {
        let txn = self.vote_repo.connection().begin().await?;

        let existing = self.vote_repo.get_by_id_in(&txn, vote_id).await?;
        let mut target = self
            .rating_repo
            .lock_by_id_in(&txn, &existing.rating_id)
            .await?;
        let has_children = self
            .rating_repo
            .has_children_in(&txn, &existing.rating_id)
            .await?;

        self.vote_repo.delete_in(&txn, vote_id).await?;
        // Aggregated totals belong to the aggregation engine
        if !has_children {
            self.rating_repo
                .apply_delta_in(
                    &txn,
                    &existing.rating_id,
                    -1,
                    -i64::from(existing.rating_value),
                )
                .await?;
            target.total_votes -= 1;
            target.total_rating -= i64::from(existing.rating_value);
        }
        txn.commit().await?;

        tracing::info!(
            rating_id = %existing.rating_id,
            vote_id = %vote_id,
            "Deleted vote"
        );

        if let Some(ref publisher) = self.event_publisher {
            publish_or_warn(
                publisher,
                RatingEvent::VoteRemoved {
                    rating_id: existing.rating_id.clone(),
                    vote_id: vote_id.to_string(),
                    value: existing.rating_value,
                },
            )
            .await;
        }

        Ok(target)
    }

    /// Delete every vote of a rating and zero its totals.
    ///
    /// A parent keeps its aggregated totals; only its own stale ledger rows
    /// are removed. Returns the rating and the number of votes removed.
    pub async fn reset_votes(&self, rating_id: &str) -> AppResult<(rating::Model, u64)> {
        let txn = self.rating_repo.connection().begin().await?;

        let mut target = self.rating_repo.lock_by_id_in(&txn, rating_id).await?;
        if target.is_mirror() {
            return Err(AppError::VotingNotAllowed {
                rating_id: rating_id.to_string(),
                reason: VotingBlock::Mirror,
            });
        }
        let has_children = self.rating_repo.has_children_in(&txn, rating_id).await?;

        let removed = self.vote_repo.delete_by_rating_in(&txn, rating_id).await?;
        if !has_children {
            self.rating_repo.set_totals_in(&txn, rating_id, 0, 0).await?;
            target.total_votes = 0;
            target.total_rating = 0;
        }
        txn.commit().await?;

        tracing::info!(rating_id = %rating_id, removed, "Reset rating votes");

        if let Some(ref publisher) = self.event_publisher {
            publish_or_warn(
                publisher,
                RatingEvent::VotesReset {
                    rating_id: rating_id.to_string(),
                    removed,
                },
            )
            .await;
        }

        Ok((target, removed))
    }

    /// Rebuild a childless rating's totals from its own votes.
    ///
    /// Used when a rating stops being a parent, so its totals stop being an
    /// aggregate. Parents and mirrors are returned untouched.
    pub async fn resync_totals(&self, rating_id: &str) -> AppResult<rating::Model> {
        let txn = self.rating_repo.connection().begin().await?;
        let target = self.resync_totals_in(&txn, rating_id).await?;
        txn.commit().await?;
        Ok(target)
    }

    async fn resync_totals_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        rating_id: &str,
    ) -> AppResult<rating::Model> {
        let mut target = self.rating_repo.lock_by_id_in(conn, rating_id).await?;
        if target.is_mirror() || self.rating_repo.has_children_in(conn, rating_id).await? {
            return Ok(target);
        }

        let (total_votes, total_rating) =
            self.vote_repo.totals_for_rating_in(conn, rating_id).await?;
        if total_votes != target.total_votes || total_rating != target.total_rating {
            self.rating_repo
                .set_totals_in(conn, rating_id, total_votes, total_rating)
                .await?;
            tracing::info!(
                rating_id = %rating_id,
                total_votes,
                total_rating,
                "Resynced rating totals from ledger"
            );
        }

        target.total_votes = total_votes;
        target.total_rating = total_rating;
        Ok(target)
    }

    /// A voter's most recent votes, newest first.
    pub async fn voter_history(&self, voter: &Voter, limit: u64) -> AppResult<Vec<vote::Model>> {
        self.vote_repo
            .find_recent_by_voter(voter, limit.clamp(1, MAX_HISTORY))
            .await
    }
}
