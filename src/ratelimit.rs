//! Edit admission quotas.
//!
//! Every client registered in a session carries an [`OpBudget`]: a token
//! budget that refills continuously and spends one token per submitted
//! operation. The session actor is the budget's only writer, so this is
//! plain mutable state with no atomics, locks, or await points inside the
//! admission check. Over-budget submissions are rejected with
//! `RateLimited` and never queued, which keeps the transform/apply
//! critical section latency-bounded under a misbehaving client.
//!
//! # Configuration Presets
//!
//! | Preset | Max ops | Window | Burst |
//! |--------|---------|--------|-------|
//! | `strict()` | 20/s | 1s | 5 |
//! | `default()` | 100/s | 1s | 25 |
//! | `relaxed()` | 1,000/s | 1s | 250 |
//! | `disabled()` | Unlimited | - | - |

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::duration_fmt;

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum operations per window per client.
    pub max_ops: u64,
    /// Time window duration.
    #[serde(with = "duration_fmt")]
    pub window: Duration,
    /// Burst allowance on top of the steady rate.
    pub burst: u64,
    /// Enable rate limiting.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_ops: 100,
            window: Duration::from_secs(1),
            burst: 25,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Strict rate limiting configuration.
    pub fn strict() -> Self {
        Self {
            max_ops: 20,
            window: Duration::from_secs(1),
            burst: 5,
            enabled: true,
        }
    }

    /// Relaxed rate limiting configuration.
    pub fn relaxed() -> Self {
        Self {
            max_ops: 1000,
            window: Duration::from_secs(1),
            burst: 250,
            enabled: true,
        }
    }

    /// Disabled rate limiting.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Per-client token budget with continuous refill.
///
/// Refill happens lazily inside [`OpBudget::admit_at`]: the elapsed time
/// since the last admission converts to fractional tokens, so a client
/// trickling edits at exactly its configured rate is never starved by
/// refill quantization, and an idle client accrues at most
/// `max_ops + burst` of headroom.
#[derive(Debug)]
pub struct OpBudget {
    tokens: f64,
    capacity: f64,
    per_second: f64,
    replenished: Instant,
    enforced: bool,
}

impl OpBudget {
    /// Build a full budget for a newly joined client.
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = (config.max_ops + config.burst) as f64;
        Self {
            tokens: capacity,
            capacity,
            per_second: config.max_ops as f64 / config.window.as_secs_f64().max(f64::EPSILON),
            replenished: Instant::now(),
            enforced: config.enabled,
        }
    }

    /// Spend one token for a submission arriving now.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Spend one token for a submission arriving at `now`.
    pub fn admit_at(&mut self, now: Instant) -> bool {
        if !self.enforced {
            return true;
        }
        let elapsed = now.saturating_duration_since(self.replenished);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.per_second).min(self.capacity);
        self.replenished = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently spendable.
    pub fn available(&self) -> u64 {
        self.tokens as u64
    }
}
