//! Rating aggregation and consistency engine for shuriken-rs.

pub mod engine;
pub mod services;

pub use engine::RatingEngine;
pub use services::*;
