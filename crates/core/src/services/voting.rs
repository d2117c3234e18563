//! Vote submission.
//!
//! Resolves mirrors, enforces guest and rate limit policy, writes the vote
//! and keeps the parent chain consistent afterwards.

use serde::Serialize;
use shuriken_common::{AppError, AppResult, Voter, VotingBlock, VotingConfig};
use shuriken_db::{
    entities::{rating, vote},
    repositories::RatingRepository,
};

use crate::services::aggregation::AggregationEngine;
use crate::services::ledger::VoteLedger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::rating::RatingView;

/// Result of [`VotingService::submit`].
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    /// The rating the voter asked for; for a mirror, under the mirror's name.
    pub rating: RatingView,
    /// The rating that received the vote.
    pub source: RatingView,
    /// The source's parent after recomputation.
    pub parent: Option<RatingView>,
    pub vote: vote::Model,
    pub is_update: bool,
}

/// Entry point for casting and withdrawing votes.
#[derive(Clone)]
pub struct VotingService {
    rating_repo: RatingRepository,
    ledger: VoteLedger,
    aggregation: AggregationEngine,
    rate_limiter: RateLimiter,
    voting: VotingConfig,
}

impl VotingService {
    /// Create a new voting service.
    #[must_use]
    pub const fn new(
        rating_repo: RatingRepository,
        ledger: VoteLedger,
        aggregation: AggregationEngine,
        rate_limiter: RateLimiter,
        voting: VotingConfig,
    ) -> Self {
        Self {
            rating_repo,
            ledger,
            aggregation,
            rate_limiter,
            voting,
        }
    }

    /// Load a rating and the rating holding its votes.
    async fn load_with_source(&self, rating_id: &str) -> AppResult<(rating::Model, rating::Model)> {
        let requested = self.rating_repo.get_by_id(rating_id).await?;
        let source = match requested.mirror_of {
            Some(ref source_id) => self.rating_repo.get_by_id(source_id).await?,
            None => requested.clone(),
        };
        Ok((requested, source))
    }

    /// Cast or change a vote.
    pub async fn submit(
        &self,
        voter: &Voter,
        rating_id: &str,
        value: i32,
    ) -> AppResult<SubmitOutcome> {
        let (requested, source) = self.load_with_source(rating_id).await?;

        if voter.is_guest() && !self.voting.allow_guest_voting {
            return Err(AppError::VotingNotAllowed {
                rating_id: source.id,
                reason: VotingBlock::GuestVotingDisabled,
            });
        }
        self.ledger.validate_value(value)?;

        self.rate_limiter
            .can_vote(voter, &source.id)
            .await?
            .into_result()?;

        let outcome = self.ledger.record(&source.id, value, voter).await?;
        let ancestors = self.aggregation.recompute_ancestors(&outcome.rating).await?;

        let source_view = RatingView::from(&outcome.rating);
        let rating_view = if requested.is_mirror() {
            RatingView::resolve(&requested, Some(&outcome.rating))
        } else {
            source_view.clone()
        };

        Ok(SubmitOutcome {
            rating: rating_view,
            source: source_view,
            parent: ancestors.first().map(RatingView::from),
            is_update: outcome.is_update(),
            vote: outcome.vote,
        })
    }

    /// The voter's current vote on a rating, following mirrors.
    pub async fn find_vote(&self, voter: &Voter, rating_id: &str) -> AppResult<Option<vote::Model>> {
        let (_, source) = self.load_with_source(rating_id).await?;
        self.ledger.find_vote(&source.id, voter).await
    }

    /// Withdraw a vote and recompute the affected parent chain.
    pub async fn remove_vote(&self, vote_id: &str) -> AppResult<RatingView> {
        let updated = self.ledger.delete_vote(vote_id).await?;
        self.aggregation.recompute_ancestors(&updated).await?;
        Ok(RatingView::from(&updated))
    }

    /// Clear every vote of a rating and recompute the affected parent chain.
    pub async fn reset(&self, rating_id: &str) -> AppResult<(RatingView, u64)> {
        let (updated, removed) = self.ledger.reset_votes(rating_id).await?;
        self.aggregation.recompute_ancestors(&updated).await?;
        Ok((RatingView::from(&updated), removed))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use shuriken_common::{Clock, ManualClock, RateLimitConfig, RateLimitReason, WindowLimits};
    use shuriken_db::entities::EffectType;
    use shuriken_db::repositories::VoteRepository;
    use std::sync::Arc;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap()
    }

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
            date_created: now().into(),
        }
    }

    fn create_test_vote(rating_id: &str, voter: &Voter, value: i32) -> vote::Model {
        vote::Model {
            id: "v1".to_string(),
            rating_id: rating_id.to_string(),
            user_id: voter.user_id(),
            user_ip: voter.ip().map(ToString::to_string),
            rating_value: value,
            date_created: now().into(),
            date_modified: now().into(),
        }
    }

    fn count(n: i64) -> std::collections::BTreeMap<&'static str, sea_orm::Value> {
        maplit::btreemap! { "num_items" => sea_orm::Value::BigInt(Some(n)) }
    }

    fn updated() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    fn service(db: MockDatabase, voting: VotingConfig, rate_limit: RateLimitConfig) -> VotingService {
        let conn = Arc::new(db.into_connection());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
        let rating_repo = RatingRepository::new(conn.clone());
        let vote_repo = VoteRepository::new(conn);
        let ledger = VoteLedger::new(
            rating_repo.clone(),
            vote_repo.clone(),
            voting.clone(),
            clock.clone(),
        );
        let aggregation = AggregationEngine::new(rating_repo.clone(), voting.clone());
        let rate_limiter = RateLimiter::new(vote_repo, rate_limit, clock);
        VotingService::new(rating_repo, ledger, aggregation, rate_limiter, voting)
    }

    #[tokio::test]
    async fn test_vote_on_mirror_lands_on_source() {
        let voter = Voter::member(3).unwrap();
        let source = create_test_rating("src", 2, 8);
        let mut mirror = create_test_rating("m1", 0, 0);
        mirror.name = "Mirror".to_string();
        mirror.mirror_of = Some("src".to_string());

        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                // requested rating and its source
                .append_query_results([[mirror]])
                .append_query_results([[source.clone()]])
                // ledger: lock, child count, existing vote, insert
                .append_query_results([[source]])
                .append_query_results([[count(0)]])
                .append_query_results([Vec::<vote::Model>::new()])
                .append_query_results([[create_test_vote("src", &voter, 5)]])
                .append_exec_results([updated()]),
            VotingConfig::default(),
            RateLimitConfig::default(),
        );

        let outcome = service.submit(&voter, "m1", 5).await.unwrap();

        assert_eq!(outcome.rating.name, "Mirror");
        assert_eq!(outcome.rating.source_id, "src");
        assert_eq!(outcome.source.id, "src");
        assert_eq!(outcome.rating.total_votes, 3);
        assert_eq!(outcome.rating.total_rating, 13);
        assert_eq!(outcome.vote.rating_id, "src");
        assert!(!outcome.is_update);
        assert!(outcome.parent.is_none());
    }

    #[tokio::test]
    async fn test_vote_on_child_recomputes_parent() {
        let voter = Voter::member(3).unwrap();
        let mut child = create_test_rating("c1", 1, 4);
        child.parent_id = Some("p1".to_string());
        child.effect_type = EffectType::Negative;
        let parent = create_test_rating("p1", 1, 2);
        let mut child_after = child.clone();
        child_after.total_votes = 2;
        child_after.total_rating = 9;

        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[child.clone()]])
                .append_query_results([[child]])
                .append_query_results([[count(0)]])
                .append_query_results([Vec::<vote::Model>::new()])
                .append_query_results([[create_test_vote("c1", &voter, 5)]])
                // recompute(p1): lock parent, read children
                .append_query_results([[parent]])
                .append_query_results([[child_after]])
                .append_exec_results([updated(), updated()]),
            VotingConfig::default(),
            RateLimitConfig::default(),
        );

        let outcome = service.submit(&voter, "c1", 5).await.unwrap();

        let parent = outcome.parent.unwrap();
        assert_eq!(parent.id, "p1");
        assert_eq!(parent.total_votes, 2);
        // negative child: 2 * 6 - 9
        assert_eq!(parent.total_rating, 3);
    }

    #[tokio::test]
    async fn test_guest_voting_disabled() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_rating("r1", 0, 0)]]),
            VotingConfig {
                allow_guest_voting: false,
                ..VotingConfig::default()
            },
            RateLimitConfig::default(),
        );

        let result = service
            .submit(&Voter::guest("198.51.100.20").unwrap(), "r1", 4)
            .await;

        assert!(matches!(
            result,
            Err(AppError::VotingNotAllowed {
                reason: VotingBlock::GuestVotingDisabled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_vote_is_not_recorded() {
        let voter = Voter::member(3).unwrap();
        let recent = {
            let mut v = create_test_vote("other", &voter, 2);
            v.date_modified = (now() - Duration::minutes(5)).into();
            v
        };

        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_rating("r1", 0, 0)]])
                .append_query_results([Vec::<vote::Model>::new()])
                .append_query_results([[recent]]),
            VotingConfig::default(),
            RateLimitConfig {
                enabled: true,
                cooldown_secs: 0,
                member: WindowLimits {
                    hourly_limit: 1,
                    daily_limit: 0,
                },
                ..RateLimitConfig::default()
            },
        );

        let result = service.submit(&voter, "r1", 4).await;

        match result {
            Err(AppError::RateLimited {
                reason,
                retry_after_secs,
            }) => {
                assert_eq!(reason, RateLimitReason::Hourly);
                assert_eq!(retry_after_secs, 55 * 60);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }
}
