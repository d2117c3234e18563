//! Error types for shuriken-rs.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Why a rating refused a direct vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingBlock {
    /// The rating only displays aggregated totals.
    DisplayOnly,
    /// The rating has children; its totals are derived.
    Parent,
    /// The rating mirrors another rating; votes go to the source.
    Mirror,
    /// Guest voting is switched off.
    GuestVotingDisabled,
}

impl fmt::Display for VotingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DisplayOnly => "rating is display-only",
            Self::Parent => "rating has sub-ratings",
            Self::Mirror => "rating is a mirror",
            Self::GuestVotingDisabled => "guest voting is disabled",
        };
        f.write_str(s)
    }
}

/// Which throttle denied a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    /// Too soon after the voter's last vote on the same rating.
    Cooldown,
    /// Trailing one-hour allowance exhausted.
    Hourly,
    /// Trailing 24-hour allowance exhausted.
    Daily,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cooldown => "cooldown",
            Self::Hourly => "hourly limit",
            Self::Daily => "daily limit",
        };
        f.write_str(s)
    }
}

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rating not found: {0}")]
    RatingNotFound(String),

    #[error("Vote not found: {0}")]
    VoteNotFound(String),

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Voting not allowed on rating {rating_id}: {reason}")]
    VotingNotAllowed {
        rating_id: String,
        reason: VotingBlock,
    },

    #[error("Rate limited ({reason}), retry after {retry_after_secs}s")]
    RateLimited {
        reason: RateLimitReason,
        retry_after_secs: u64,
    },

    // === Server Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code for callers rendering a message.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RatingNotFound(_) => "RATING_NOT_FOUND",
            Self::VoteNotFound(_) => "VOTE_NOT_FOUND",
            Self::InvalidTopology(_) => "INVALID_TOPOLOGY",
            Self::VotingNotAllowed { .. } => "VOTING_NOT_ALLOWED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error originates on our side rather than the caller's.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Config(_) | Self::Internal(_)
        )
    }

    /// Seconds until a rate-limited caller may retry, if this is a rate limit.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Log this error at the level matching its origin.
    pub fn log(&self) {
        let code = self.error_code();
        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<sea_orm::TransactionError<Self>> for AppError {
    fn from(err: sea_orm::TransactionError<Self>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(e) => Self::Database(e.to_string()),
            sea_orm::TransactionError::Transaction(e) => e,
        }
    }
}
