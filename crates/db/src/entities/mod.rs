//! Database entities.

#![allow(missing_docs)]

pub mod rating;
pub mod vote;

pub use rating::{EffectType, Entity as Rating};
pub use vote::Entity as Vote;
