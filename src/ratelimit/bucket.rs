//! Token bucket accounting.
//!
//! Buckets are plain values: every transition returns a new [`BucketState`]
//! and leaves the input untouched. Tokens are fractional; the only rounding
//! happens when a retry delay is computed, and that always rounds up.

use serde::{Deserialize, Serialize};

/// Retry delay reported when a bucket can never refill.
pub const RETRY_NEVER: u64 = u64::MAX;

/// Default TTL for buckets that never refill (24 hours).
pub const NO_REFILL_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Shape of a bucket: how big it is and how fast it refills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Maximum number of tokens the bucket can hold
    pub capacity: f64,
    /// Tokens added per refill interval
    pub refill_tokens: f64,
    /// Length of one refill interval in milliseconds
    pub refill_interval_ms: u64,
}

impl BucketConfig {
    /// Create a new bucket configuration.
    pub fn new(capacity: f64, refill_tokens: f64, refill_interval_ms: u64) -> Self {
        Self {
            capacity,
            refill_tokens,
            refill_interval_ms,
        }
    }

    /// Whether this bucket ever gains tokens back.
    pub fn refills(&self) -> bool {
        self.refill_tokens > 0.0 && self.refill_interval_ms > 0
    }

    /// Milliseconds until `tokens_needed` more tokens are available.
    ///
    /// Rounded up, so a caller is never told to come back too early.
    /// Returns [`RETRY_NEVER`] when the bucket does not refill.
    pub fn retry_after_ms(&self, tokens_needed: f64) -> u64 {
        if tokens_needed <= 0.0 {
            return 0;
        }
        if !self.refills() {
            return RETRY_NEVER;
        }

        let wait = (tokens_needed * self.refill_interval_ms as f64 / self.refill_tokens).ceil();
        if !wait.is_finite() || wait >= RETRY_NEVER as f64 {
            RETRY_NEVER
        } else {
            wait as u64
        }
    }

    /// Default bucket TTL: twice the time it takes to refill from empty.
    pub fn default_ttl_ms(&self) -> u64 {
        if !self.refills() {
            return NO_REFILL_TTL_MS;
        }

        let ttl =
            (2.0 * self.capacity * self.refill_interval_ms as f64 / self.refill_tokens).ceil();
        if !ttl.is_finite() || ttl >= u64::MAX as f64 {
            u64::MAX
        } else {
            (ttl as u64).max(1)
        }
    }
}

/// Persisted state of a single bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketState {
    /// Tokens currently available (fractional)
    pub tokens: f64,
    /// Last time tokens were credited
    pub last_refill_time: u64,
    /// When the bucket was first created
    pub created_at: u64,
    /// When the bucket becomes eligible for reclamation
    pub expires_at: u64,
}

/// Result of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeOutcome {
    /// The bucket after the attempt
    pub state: BucketState,
    /// Whether the tokens were granted
    pub allowed: bool,
    /// How long to wait before the cost could be paid (0 when allowed)
    pub retry_after_ms: u64,
}

impl BucketState {
    /// A full bucket created at `now`.
    pub fn new(config: &BucketConfig, now: u64, ttl_ms: u64) -> Self {
        Self {
            tokens: config.capacity,
            last_refill_time: now,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    /// Whether the bucket has outlived its TTL.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Credit the tokens earned since the last refill.
    ///
    /// A clock that has not moved (or moved backwards) leaves the state
    /// exactly as it was.
    pub fn refill(&self, config: &BucketConfig, now: u64) -> Self {
        let elapsed = now.saturating_sub(self.last_refill_time);
        if elapsed == 0 {
            return *self;
        }

        let earned = if config.refills() {
            elapsed as f64 * config.refill_tokens / config.refill_interval_ms as f64
        } else {
            0.0
        };

        Self {
            tokens: (self.tokens + earned).min(config.capacity),
            last_refill_time: now,
            ..*self
        }
    }

    /// Refill, then try to take `cost` tokens.
    ///
    /// Either way the expiry moves to `now + ttl_ms`, so a key that keeps
    /// getting denied keeps its record.
    pub fn consume(
        &self,
        config: &BucketConfig,
        cost: f64,
        now: u64,
        ttl_ms: u64,
    ) -> ConsumeOutcome {
        let refilled = self.refill(config, now);
        let expires_at = now.saturating_add(ttl_ms);

        if refilled.tokens >= cost {
            ConsumeOutcome {
                state: BucketState {
                    tokens: refilled.tokens - cost,
                    expires_at,
                    ..refilled
                },
                allowed: true,
                retry_after_ms: 0,
            }
        } else {
            ConsumeOutcome {
                state: BucketState {
                    expires_at,
                    ..refilled
                },
                allowed: false,
                retry_after_ms: config.retry_after_ms(cost - refilled.tokens),
            }
        }
    }
}
