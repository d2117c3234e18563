//! Wiring of the rating services over one shared connection.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use shuriken_common::{Clock, Config, SystemClock};
use shuriken_db::repositories::{RatingRepository, VoteRepository};

use crate::services::{
    AggregationEngine, BypassPolicy, EventPublisherService, RateLimiter, RatingStore, VoteLedger,
    VotingService,
};

/// Every service of the engine, built from one configuration.
#[derive(Clone)]
pub struct RatingEngine {
    pub ratings: RatingStore,
    pub voting: VotingService,
    pub ledger: VoteLedger,
    pub aggregation: AggregationEngine,
    pub rate_limiter: RateLimiter,
}

impl RatingEngine {
    /// Build the engine on the system clock without event publication.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>, config: &Config) -> Self {
        Self::with_parts(db, config, Arc::new(SystemClock), None, None)
    }

    /// Build the engine with an explicit time source and optional publisher.
    ///
    /// `bypass` replaces the configured allow list as the rate limiter's
    /// bypass policy.
    #[must_use]
    pub fn with_parts(
        db: Arc<DatabaseConnection>,
        config: &Config,
        clock: Arc<dyn Clock>,
        event_publisher: Option<EventPublisherService>,
        bypass: Option<Arc<dyn BypassPolicy>>,
    ) -> Self {
        let rating_repo = RatingRepository::new(Arc::clone(&db));
        let vote_repo = VoteRepository::new(Arc::clone(&db));

        let mut ledger = VoteLedger::new(
            rating_repo.clone(),
            vote_repo.clone(),
            config.voting.clone(),
            Arc::clone(&clock),
        );
        let mut aggregation = AggregationEngine::new(rating_repo.clone(), config.voting.clone());
        if let Some(ref publisher) = event_publisher {
            ledger.set_event_publisher(Arc::clone(publisher));
            aggregation.set_event_publisher(Arc::clone(publisher));
        }

        let mut rate_limiter = RateLimiter::new(
            vote_repo.clone(),
            config.rate_limit.clone(),
            Arc::clone(&clock),
        );
        if let Some(bypass) = bypass {
            rate_limiter = rate_limiter.with_bypass(bypass);
        }

        let mut ratings = RatingStore::new(
            rating_repo.clone(),
            vote_repo,
            ledger.clone(),
            aggregation.clone(),
            config.voting.clone(),
            clock,
        );
        if let Some(publisher) = event_publisher {
            ratings.set_event_publisher(publisher);
        }

        let voting = VotingService::new(
            rating_repo,
            ledger.clone(),
            aggregation.clone(),
            rate_limiter.clone(),
            config.voting.clone(),
        );

        Self {
            ratings,
            voting,
            ledger,
            aggregation,
            rate_limiter,
        }
    }
}
