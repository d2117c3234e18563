//! Common utilities and shared types for shuriken-rs.
//!
//! This crate provides foundational components used across all shuriken-rs crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//! - **Time**: Injectable wall clock via [`Clock`]
//! - **Identity**: Member or guest voters via [`Voter`]
//!
//! # Example
//!
//! ```no_run
//! use shuriken_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let id = id_gen.generate();
//!     println!("Generated ID: {id} (scale 1-{})", config.voting.max_value);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod id;
pub mod voter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, DatabaseConfig, LoggingConfig, RateLimitConfig, VotingConfig, WindowLimits};
pub use error::{AppError, AppResult, RateLimitReason, VotingBlock};
pub use id::IdGenerator;
pub use voter::Voter;
