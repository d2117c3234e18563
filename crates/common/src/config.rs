//! Application configuration.

use serde::Deserialize;
use std::path::Path;

use crate::error::{AppError, AppResult};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Voting rules.
    #[serde(default)]
    pub voting: VotingConfig,
    /// Vote throttling.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Voting rules.
#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// Highest accepted vote value; votes range over `1..=max_value`.
    #[serde(default = "default_max_value")]
    pub max_value: i32,
    /// Whether unauthenticated voters may vote.
    #[serde(default = "default_true")]
    pub allow_guest_voting: bool,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            max_value: default_max_value(),
            allow_guest_voting: true,
        }
    }
}

impl VotingConfig {
    /// Constant a negative-effect child's votes are mirrored around.
    ///
    /// A vote `v` on a negative child contributes `inversion_constant - v`
    /// to its parent, so on a 1-5 scale a 5 counts as a 1.
    #[must_use]
    pub const fn inversion_constant(&self) -> i64 {
        self.max_value as i64 + 1
    }
}

/// Per-window limits for one class of voter. `0` disables a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowLimits {
    /// Maximum votes in any trailing hour.
    pub hourly_limit: u32,
    /// Maximum votes in any trailing 24 hours.
    pub daily_limit: u32,
}

/// Vote throttling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Whether throttling applies at all.
    #[serde(default)]
    pub enabled: bool,
    /// Minimum seconds between two votes of one voter on one rating.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Limits for authenticated voters.
    #[serde(default = "default_member_limits")]
    pub member: WindowLimits,
    /// Limits for guest voters.
    #[serde(default = "default_guest_limits")]
    pub guest: WindowLimits,
    /// User ids that are never throttled.
    #[serde(default)]
    pub bypass_user_ids: Vec<i64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown_secs: default_cooldown_secs(),
            member: default_member_limits(),
            guest: default_guest_limits(),
            bypass_user_ids: Vec::new(),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

const fn default_max_value() -> i32 {
    5
}

const fn default_cooldown_secs() -> u64 {
    60
}

const fn default_member_limits() -> WindowLimits {
    WindowLimits {
        hourly_limit: 30,
        daily_limit: 100,
    }
}

const fn default_guest_limits() -> WindowLimits {
    WindowLimits {
        hourly_limit: 10,
        daily_limit: 30,
    }
}

const fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `SHURIKEN_ENV`)
    /// 3. Environment variables with `SHURIKEN__` prefix
    pub fn load() -> AppResult<Self> {
        let env = std::env::var("SHURIKEN_ENV").unwrap_or_else(|_| "development".to_string());

        let config: Self = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SHURIKEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("SHURIKEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.voting.max_value < 2 {
            return Err(AppError::Config(format!(
                "voting.max_value must be at least 2, got {}",
                self.voting.max_value
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(
            r#"
            [database]
            url = "postgres://localhost/shuriken"
            "#,
        );

        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.voting.max_value, 5);
        assert!(config.voting.allow_guest_voting);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.cooldown_secs, 60);
        assert_eq!(config.rate_limit.member.hourly_limit, 30);
        assert_eq!(config.rate_limit.guest.daily_limit, 30);
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = parse(
            r#"
            [database]
            url = "postgres://localhost/shuriken"

            [voting]
            max_value = 10
            allow_guest_voting = false

            [rate_limit]
            enabled = true
            cooldown_secs = 5
            bypass_user_ids = [1, 2]

            [rate_limit.guest]
            hourly_limit = 3
            daily_limit = 6
            "#,
        );

        assert_eq!(config.voting.max_value, 10);
        assert_eq!(config.voting.inversion_constant(), 11);
        assert!(!config.voting.allow_guest_voting);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.bypass_user_ids, vec![1, 2]);
        assert_eq!(
            config.rate_limit.guest,
            WindowLimits {
                hourly_limit: 3,
                daily_limit: 6
            }
        );
        assert_eq!(config.rate_limit.member.daily_limit, 100);
    }

    #[test]
    fn test_inversion_constant_default_scale() {
        assert_eq!(VotingConfig::default().inversion_constant(), 6);
    }

    #[test]
    fn test_rejects_degenerate_scale() {
        let mut config = parse(
            r#"
            [database]
            url = "postgres://localhost/shuriken"
            "#,
        );
        config.voting.max_value = 1;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
