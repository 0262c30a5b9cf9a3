//! Token-bucket primitive and rate-limit header helpers.

use std::convert::TryFrom;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header::RETRY_AFTER};
use nebula_config::RateRule;
use tokio::time::Instant;

use crate::http::constants::{
    HEADER_RATE_LIMIT_LIMIT, HEADER_RATE_LIMIT_REMAINING, HEADER_RATE_LIMIT_RESET,
};

const MICROS_PER_SEC: u128 = 1_000_000;

/// Outcome of one admission attempt against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketDecision {
    pub(crate) allowed: bool,
    pub(crate) limit: u32,
    pub(crate) remaining: u32,
    pub(crate) retry_after: Duration,
}

/// Bucket holding `burst` tokens, refilled continuously at `rate_per_sec`.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    rule: RateRule,
    tokens: u128,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    const TOKEN_SCALE: u128 = 1_000_000;

    pub(crate) fn new(rule: RateRule, now: Instant) -> Self {
        Self {
            rule,
            tokens: Self::capacity_for(rule),
            last_refill: now,
            last_seen: now,
        }
    }

    fn capacity_for(rule: RateRule) -> u128 {
        u128::from(rule.burst) * Self::TOKEN_SCALE
    }

    fn capacity(&self) -> u128 {
        Self::capacity_for(self.rule)
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed == Duration::ZERO {
            return;
        }

        let capacity = self.capacity();
        let per_sec = u128::from(self.rule.rate_per_sec) * Self::TOKEN_SCALE;
        let replenished = per_sec
            .saturating_mul(elapsed.as_micros())
            .checked_div(MICROS_PER_SEC);

        if let Some(amount) = replenished
            && amount > 0
        {
            self.tokens = self.tokens.saturating_add(amount).min(capacity);
            self.last_refill = now;
        }
    }

    /// Take one token if available.
    pub(crate) fn try_acquire(&mut self, now: Instant) -> BucketDecision {
        self.last_seen = now;
        self.refill(now);

        if self.tokens >= Self::TOKEN_SCALE {
            self.tokens -= Self::TOKEN_SCALE;
            BucketDecision {
                allowed: true,
                limit: self.rule.burst,
                remaining: self.remaining_tokens(),
                retry_after: Duration::ZERO,
            }
        } else {
            BucketDecision {
                allowed: false,
                limit: self.rule.burst,
                remaining: 0,
                retry_after: self.retry_delay(),
            }
        }
    }

    /// Last time this bucket was consulted.
    pub(crate) const fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn remaining_tokens(&self) -> u32 {
        let tokens = self.tokens / Self::TOKEN_SCALE;
        u32::try_from(tokens).unwrap_or(u32::MAX)
    }

    fn retry_delay(&self) -> Duration {
        if self.rule.rate_per_sec == 0 {
            return Duration::MAX;
        }

        let deficit = Self::TOKEN_SCALE.saturating_sub(self.tokens);
        let per_sec = u128::from(self.rule.rate_per_sec) * Self::TOKEN_SCALE;
        let retry_micros = deficit.saturating_mul(MICROS_PER_SEC).div_ceil(per_sec);
        let clamped = retry_micros.min(u128::from(u64::MAX));
        let micros = u64::try_from(clamped).unwrap_or(u64::MAX);
        Duration::from_micros(micros)
    }
}

pub(crate) fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    limit: u32,
    remaining: u32,
    retry_after: Option<Duration>,
) {
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert(HEADER_RATE_LIMIT_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert(HEADER_RATE_LIMIT_REMAINING, value);
    }
    if let Some(wait) = retry_after {
        let secs = wait.as_secs();
        let seconds = if secs == 0 && wait.subsec_nanos() > 0 {
            1
        } else {
            secs.max(1)
        };
        let text = seconds.to_string();
        if let Ok(value) = HeaderValue::from_str(&text) {
            headers.insert(RETRY_AFTER, value.clone());
            headers.insert(HEADER_RATE_LIMIT_RESET, value);
        }
    }
}
