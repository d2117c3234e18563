//! Business logic services.

#![allow(missing_docs)]

pub mod aggregation;
pub mod event_publisher;
pub mod ledger;
pub mod rate_limiter;
pub mod rating;
pub mod voting;

pub use aggregation::{AggregationEngine, Totals, aggregate_children};
pub use event_publisher::{
    CollectingEventPublisher, EventPublisher, EventPublisherService, NoOpEventPublisher,
    RatingEvent,
};
pub use ledger::{VoteLedger, VoteOutcome, ensure_votable};
pub use rate_limiter::{
    AllowListBypass, BypassPolicy, NoBypass, RateLimitDecision, RateLimitUsage, RateLimiter,
};
pub use rating::{
    CreateRatingInput, ListRatingsParams, RatingDeletion, RatingPage, RatingStats, RatingStore,
    RatingView, UpdateRatingInput,
};
pub use voting::{SubmitOutcome, VotingService};
