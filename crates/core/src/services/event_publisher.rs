//! Event publisher service.
//!
//! Provides an abstraction for announcing rating changes to listeners
//! (cache invalidation, live score widgets) without the engine depending on
//! any particular transport.

use async_trait::async_trait;
use serde::Serialize;
use shuriken_common::{AppResult, Voter};
use std::sync::{Arc, Mutex, PoisonError};

/// Event types for rating changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RatingEvent {
    /// A vote was inserted or changed.
    VoteRecorded {
        rating_id: String,
        voter: Voter,
        value: i32,
        previous_value: Option<i32>,
    },
    /// A single vote was removed.
    VoteRemoved {
        rating_id: String,
        vote_id: String,
        value: i32,
    },
    /// Every vote of a rating was removed.
    VotesReset { rating_id: String, removed: u64 },
    /// A parent's totals were recomputed from its children.
    RatingRecomputed {
        rating_id: String,
        total_votes: i64,
        total_rating: i64,
    },
    /// A rating was deleted.
    RatingDeleted {
        rating_id: String,
        detached_children: u64,
        detached_mirrors: u64,
    },
}

/// Trait for publishing rating events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: RatingEvent) -> AppResult<()>;
}

/// Wrapper for boxed EventPublisher trait object.
pub type EventPublisherService = Arc<dyn EventPublisher>;

/// Publish an event, logging failures instead of returning them.
pub async fn publish_or_warn(publisher: &EventPublisherService, event: RatingEvent) {
    if let Err(e) = publisher.publish(event).await {
        tracing::warn!(error = %e, "Failed to publish rating event");
    }
}

/// A no-op implementation of EventPublisher for when nobody listens.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, _event: RatingEvent) -> AppResult<()> {
        Ok(())
    }
}

/// Keeps every published event in memory.
#[derive(Clone, Default)]
pub struct CollectingEventPublisher {
    events: Arc<Mutex<Vec<RatingEvent>>>,
}

impl CollectingEventPublisher {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<RatingEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventPublisher for CollectingEventPublisher {
    async fn publish(&self, event: RatingEvent) -> AppResult<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
