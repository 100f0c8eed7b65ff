//! Per-user inbound message rate limiter.
//!
//! Each user has a sliding one-second window of message arrival times.
//! Going over the limit throttles the user for a cooldown; every message
//! while throttled is rejected, and another violation during the cooldown
//! restarts it. The throttle lifts only once a full cooldown passes
//! without a violation.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Rate limiter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Messages allowed per user per window.
    pub max_messages_per_second: usize,
    /// Throttle duration after a violation, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: 60,
            cooldown_ms: 5_000,
        }
    }
}

impl RateLimitConfig {
    /// Cooldown as a duration.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Result of checking one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Rejected; the throttle lifts at `until` unless violated again.
    Throttled { until: Instant },
}

#[derive(Debug, Default)]
struct UserWindow {
    arrivals: VecDeque<Instant>,
    throttled_until: Option<Instant>,
}

impl UserWindow {
    fn record(&mut self, now: Instant) -> usize {
        while self
            .arrivals
            .front()
            .is_some_and(|t| now.duration_since(*t) >= WINDOW)
        {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(now);
        self.arrivals.len()
    }
}

/// Sliding-window limiter keyed by user id.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    users: DashMap<String, UserWindow>,
}

impl RateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            users: DashMap::new(),
        }
    }

    /// Records a message from `user_id` arriving at `now` and decides it.
    pub fn check(&self, user_id: &str, now: Instant) -> RateDecision {
        let mut window = self.users.entry(user_id.to_string()).or_default();
        let count = window.record(now);
        let violated = count > self.config.max_messages_per_second;

        if violated {
            let until = now + self.config.cooldown();
            if window.throttled_until.is_none() {
                warn!(user_id, count, "user exceeded message rate, throttling");
            }
            window.throttled_until = Some(until);
            return RateDecision::Throttled { until };
        }
        match window.throttled_until {
            Some(until) if now < until => RateDecision::Throttled { until },
            Some(_) => {
                debug!(user_id, "rate limit cooldown elapsed");
                window.throttled_until = None;
                RateDecision::Allowed
            }
            None => RateDecision::Allowed,
        }
    }

    /// Whether `user_id` is currently throttled.
    #[must_use]
    pub fn is_throttled(&self, user_id: &str, now: Instant) -> bool {
        self.users
            .get(user_id)
            .and_then(|w| w.throttled_until)
            .is_some_and(|until| now < until)
    }

    /// Drops the window of a disconnected user unless they are still
    /// throttled, so reconnecting cannot skip a cooldown.
    pub fn release(&self, user_id: &str, now: Instant) {
        self.users
            .remove_if(user_id, |_, w| w.throttled_until.is_none_or(|u| now >= u));
    }

    /// Number of tracked users.
    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}
