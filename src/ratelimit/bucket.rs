//! Token bucket state and refill arithmetic.

use std::time::Instant;

use crate::error::{FloodgateError, Result};

/// Result of a rate limit check.
///
/// `retry_after` is the minimal wait in seconds after which a retry would
/// succeed, assuming no other request consumes first. It is `0.0` when the
/// request was admitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Seconds until at least one token will be available, if denied.
    pub retry_after: f64,
}

impl RateLimitDecision {
    /// An admitted request.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: 0.0,
        }
    }

    /// A denied request that may be retried after `retry_after` seconds.
    pub fn denied(retry_after: f64) -> Self {
        Self {
            allowed: false,
            retry_after: retry_after.max(0.0),
        }
    }
}

/// A continuously refilling token bucket for one identity.
///
/// Tokens accrue at `refill_rate` per second up to `capacity`; each admitted
/// request consumes some. A fresh bucket starts full, so a new identity gets
/// its whole burst allowance up front.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    updated_at: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// A non-positive `rate` or a negative `capacity` is a configuration
    /// error. `capacity = 0.0` is legal and denies everything.
    pub fn new(rate: f64, capacity: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "refill rate must be greater than 0, got {rate}"
            )));
        }
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(FloodgateError::Config(format!(
                "capacity must not be negative, got {capacity}"
            )));
        }

        Ok(Self {
            capacity,
            refill_rate: rate,
            tokens: capacity,
            updated_at: Instant::now(),
        })
    }

    /// Refill for the time elapsed up to `now`, then consume `tokens` if
    /// available.
    ///
    /// The caller supplies `now` so the clock stays under its control; a
    /// `now` earlier than the last refill contributes zero elapsed time
    /// rather than winding tokens forward.
    pub fn acquire_at(&mut self, tokens: f64, now: Instant) -> RateLimitDecision {
        let elapsed = now.saturating_duration_since(self.updated_at);
        if !elapsed.is_zero() {
            self.tokens = self
                .capacity
                .min(self.tokens + elapsed.as_secs_f64() * self.refill_rate);
        }
        // Always advance to `now` so a regressed clock cannot replay the
        // same elapsed interval on the next call.
        if now > self.updated_at {
            self.updated_at = now;
        }

        if self.tokens >= tokens {
            self.tokens -= tokens;
            return RateLimitDecision::allowed();
        }

        let deficit = tokens - self.tokens;
        RateLimitDecision::denied(deficit / self.refill_rate)
    }

    /// Current token count, without refilling.
    #[cfg(test)]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}
