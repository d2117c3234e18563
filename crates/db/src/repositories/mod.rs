//! Repository layer.

pub mod rating;
pub mod vote;

pub use rating::RatingRepository;
pub use vote::VoteRepository;
