//! Voter identity.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Who cast a vote: an authenticated user or a guest identified by IP.
///
/// Stored as `user_id = 0` plus the IP for guests, and as the user id with
/// no IP for members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Voter {
    /// Authenticated user with a non-zero id.
    Member {
        /// User id.
        user_id: i64,
    },
    /// Unauthenticated visitor.
    Guest {
        /// Normalized IP address.
        ip: String,
    },
}

impl Voter {
    /// Build a member voter. The id must be positive.
    pub fn member(user_id: i64) -> AppResult<Self> {
        if user_id <= 0 {
            return Err(AppError::Validation(format!(
                "member voter id must be positive, got {user_id}"
            )));
        }
        Ok(Self::Member { user_id })
    }

    /// Build a guest voter from a textual IP address.
    pub fn guest(ip: &str) -> AppResult<Self> {
        let parsed: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| AppError::Validation(format!("invalid guest IP address: {ip:?}")))?;
        Ok(Self::Guest {
            ip: parsed.to_string(),
        })
    }

    /// Rebuild a voter from stored columns.
    pub fn from_columns(user_id: i64, user_ip: Option<&str>) -> AppResult<Self> {
        match (user_id, user_ip) {
            (0, Some(ip)) => Self::guest(ip),
            (0, None) => Err(AppError::Internal(
                "guest vote stored without an IP".to_string(),
            )),
            (id, _) => Self::member(id),
        }
    }

    /// Stored user id (`0` for guests).
    #[must_use]
    pub const fn user_id(&self) -> i64 {
        match self {
            Self::Member { user_id } => *user_id,
            Self::Guest { .. } => 0,
        }
    }

    /// Stored IP (`None` for members).
    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        match self {
            Self::Member { .. } => None,
            Self::Guest { ip } => Some(ip),
        }
    }

    /// Whether this voter is unauthenticated.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self, Self::Guest { .. })
    }
}

impl fmt::Display for Voter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member { user_id } => write!(f, "user:{user_id}"),
            Self::Guest { ip } => write!(f, "guest:{ip}"),
        }
    }
}
