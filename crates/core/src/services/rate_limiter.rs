//! Vote rate limiting.
//!
//! Cooldown per (voter, rating) plus trailing hourly and daily windows per
//! voter. Checks only read vote timestamps; the vote write itself is what
//! changes the next evaluation, so two concurrent checks may both pass a
//! boundary by one vote.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shuriken_common::{AppError, AppResult, Clock, RateLimitConfig, RateLimitReason, Voter, WindowLimits};
use shuriken_db::repositories::VoteRepository;

fn hour() -> Duration {
    Duration::hours(1)
}

fn day() -> Duration {
    Duration::days(1)
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny {
        reason: RateLimitReason,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert a denial into [`AppError::RateLimited`].
    pub fn into_result(self) -> AppResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny {
                reason,
                retry_after,
            } => Err(AppError::RateLimited {
                reason,
                retry_after_secs: whole_seconds_up(retry_after),
            }),
        }
    }
}

/// Remaining allowance in each window. `None` means the window is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    pub hourly_remaining: Option<u32>,
    pub daily_remaining: Option<u32>,
}

/// Decides which voters skip rate limiting entirely.
pub trait BypassPolicy: Send + Sync {
    fn bypasses(&self, voter: &Voter) -> bool;
}

/// Nobody bypasses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBypass;

impl BypassPolicy for NoBypass {
    fn bypasses(&self, _voter: &Voter) -> bool {
        false
    }
}

/// Members listed by user ID bypass; guests never do.
#[derive(Debug, Clone, Default)]
pub struct AllowListBypass {
    user_ids: HashSet<i64>,
}

impl AllowListBypass {
    #[must_use]
    pub fn new(user_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            user_ids: user_ids.into_iter().filter(|id| *id > 0).collect(),
        }
    }

    /// Build from the configured `bypass_user_ids`.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.bypass_user_ids.iter().copied())
    }
}

impl BypassPolicy for AllowListBypass {
    fn bypasses(&self, voter: &Voter) -> bool {
        !voter.is_guest() && self.user_ids.contains(&voter.user_id())
    }
}

/// Round a duration up to whole seconds, never below one.
fn whole_seconds_up(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(1);
    u64::try_from((millis + 999) / 1000).unwrap_or(1)
}

/// Check one trailing window. `activity` must be sorted oldest first.
fn check_window(
    now: DateTime<Utc>,
    activity: &[DateTime<Utc>],
    window: Duration,
    limit: u32,
) -> Option<Duration> {
    if limit == 0 {
        return None;
    }

    let start = now - window;
    let in_window: Vec<_> = activity.iter().filter(|at| **at > start).collect();
    if in_window.len() < limit as usize {
        return None;
    }

    // Allowance frees up once enough of the oldest entries age out
    let freeing = in_window[in_window.len() - limit as usize];
    Some(*freeing + window - now)
}

/// Decide whether a vote is allowed.
///
/// `last_on_rating` is when the voter last touched the target rating;
/// `activity` holds the voter's vote timestamps of the last day, oldest
/// first. Checks run in order cooldown, hourly, daily.
#[must_use]
pub fn evaluate(
    cooldown: Duration,
    limits: WindowLimits,
    now: DateTime<Utc>,
    last_on_rating: Option<DateTime<Utc>>,
    activity: &[DateTime<Utc>],
) -> RateLimitDecision {
    if let Some(last) = last_on_rating {
        let elapsed = now - last;
        if cooldown > Duration::zero() && elapsed < cooldown {
            return RateLimitDecision::Deny {
                reason: RateLimitReason::Cooldown,
                retry_after: cooldown - elapsed,
            };
        }
    }

    if let Some(retry_after) = check_window(now, activity, hour(), limits.hourly_limit) {
        return RateLimitDecision::Deny {
            reason: RateLimitReason::Hourly,
            retry_after,
        };
    }

    if let Some(retry_after) = check_window(now, activity, day(), limits.daily_limit) {
        return RateLimitDecision::Deny {
            reason: RateLimitReason::Daily,
            retry_after,
        };
    }

    RateLimitDecision::Allow
}

fn remaining(now: DateTime<Utc>, activity: &[DateTime<Utc>], window: Duration, limit: u32) -> Option<u32> {
    if limit == 0 {
        return None;
    }
    let start = now - window;
    let used = activity.iter().filter(|at| **at > start).count();
    Some(limit.saturating_sub(u32::try_from(used).unwrap_or(u32::MAX)))
}

/// Rate limiter backed by the vote ledger's timestamps.
#[derive(Clone)]
pub struct RateLimiter {
    vote_repo: VoteRepository,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    bypass: Arc<dyn BypassPolicy>,
}

impl RateLimiter {
    /// Create a rate limiter using the configured allow list as bypass policy.
    #[must_use]
    pub fn new(vote_repo: VoteRepository, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let bypass = Arc::new(AllowListBypass::from_config(&config));
        Self {
            vote_repo,
            config,
            clock,
            bypass,
        }
    }

    /// Replace the bypass policy.
    #[must_use]
    pub fn with_bypass(mut self, bypass: Arc<dyn BypassPolicy>) -> Self {
        self.bypass = bypass;
        self
    }

    const fn limits_for(&self, voter: &Voter) -> WindowLimits {
        if voter.is_guest() {
            self.config.guest
        } else {
            self.config.member
        }
    }

    fn exempt(&self, voter: &Voter) -> bool {
        !self.config.enabled || self.bypass.bypasses(voter)
    }

    async fn activity(&self, voter: &Voter, now: DateTime<Utc>) -> AppResult<Vec<DateTime<Utc>>> {
        let votes = self
            .vote_repo
            .find_by_voter_since(voter, (now - day()).fixed_offset())
            .await?;
        let mut activity: Vec<_> = votes
            .iter()
            .map(|v| v.date_modified.with_timezone(&Utc))
            .collect();
        activity.sort_unstable();
        Ok(activity)
    }

    /// Check whether `voter` may vote on `rating_id` now.
    pub async fn can_vote(&self, voter: &Voter, rating_id: &str) -> AppResult<RateLimitDecision> {
        if self.exempt(voter) {
            return Ok(RateLimitDecision::Allow);
        }

        let now = self.clock.now();
        let last_on_rating = self
            .vote_repo
            .find_by_rating_and_voter(rating_id, voter)
            .await?
            .map(|v| v.date_modified.with_timezone(&Utc));
        let activity = self.activity(voter, now).await?;

        let cooldown = i64::try_from(self.config.cooldown_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let decision = evaluate(cooldown, self.limits_for(voter), now, last_on_rating, &activity);

        if let RateLimitDecision::Deny {
            reason,
            retry_after,
        } = decision
        {
            tracing::debug!(
                voter = %voter,
                rating_id = %rating_id,
                %reason,
                retry_after_secs = retry_after.num_seconds(),
                "Vote rate limited"
            );
        }

        Ok(decision)
    }

    /// Remaining hourly and daily allowance for `voter`.
    pub async fn usage(&self, voter: &Voter) -> AppResult<RateLimitUsage> {
        if self.exempt(voter) {
            return Ok(RateLimitUsage {
                hourly_remaining: None,
                daily_remaining: None,
            });
        }

        let now = self.clock.now();
        let activity = self.activity(voter, now).await?;
        let limits = self.limits_for(voter);

        Ok(RateLimitUsage {
            hourly_remaining: remaining(now, &activity, hour(), limits.hourly_limit),
            daily_remaining: remaining(now, &activity, day(), limits.daily_limit),
        })
    }
}
