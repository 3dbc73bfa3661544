//! Single-process rate limiter holding per-identity buckets in memory.

use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{FloodgateError, Result};

use super::backend::RateLimiterBackend;
use super::bucket::{RateLimitDecision, TokenBucket};

/// Maintains one token bucket per identifier in local process memory.
///
/// The map is sharded (dashmap) and each bucket sits behind its own mutex,
/// so concurrent requests for one identity serialize their refill-and-consume
/// step while distinct identities never contend.
pub struct InMemoryRateLimiter {
    rate: f64,
    capacity: f64,
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl InMemoryRateLimiter {
    /// Create a limiter enforcing `rate` tokens/sec with a burst of `capacity`.
    pub fn new(rate: f64, capacity: f64) -> Result<Self> {
        // Validate once here so per-identity bucket creation cannot fail.
        TokenBucket::new(rate, capacity)?;

        Ok(Self {
            rate,
            capacity,
            buckets: DashMap::new(),
        })
    }

    /// Check the quota for `identifier` at an explicit point in time.
    ///
    /// The bucket is created at full capacity on first sight. Holding the
    /// bucket mutex across refill and consume makes the §4.1 sequence one
    /// atomic unit per identity.
    pub fn acquire_at(&self, identifier: &str, tokens: u32, now: Instant) -> RateLimitDecision {
        let entry = self.buckets.entry(identifier.to_owned()).or_insert_with(|| {
            debug!(identifier = %identifier, "Creating rate limit bucket");
            Mutex::new(
                TokenBucket::new(self.rate, self.capacity)
                    .expect("limits validated at construction"),
            )
        });

        let decision = entry.lock().acquire_at(tokens as f64, now);
        trace!(
            identifier = %identifier,
            allowed = decision.allowed,
            retry_after = decision.retry_after,
            "Checked local rate limit"
        );
        decision
    }

    /// Number of identities with a live bucket.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl RateLimiterBackend for InMemoryRateLimiter {
    async fn acquire(&self, identifier: &str, tokens: u32) -> Result<RateLimitDecision> {
        if identifier.is_empty() {
            return Err(FloodgateError::Config(
                "identifier must be provided".to_string(),
            ));
        }
        Ok(self.acquire_at(identifier, tokens, Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejects_invalid_limits() {
        assert!(InMemoryRateLimiter::new(0.0, 5.0).is_err());
        assert!(InMemoryRateLimiter::new(1.0, -1.0).is_err());
    }

    #[test]
    fn test_bucket_created_lazily_at_capacity() {
        let limiter = InMemoryRateLimiter::new(1.0, 2.0).unwrap();
        assert_eq!(limiter.bucket_count(), 0);

        let now = Instant::now();
        assert!(limiter.acquire_at("ip:10.0.0.1", 1, now).allowed);
        assert!(limiter.acquire_at("ip:10.0.0.1", 1, now).allowed);
        assert!(!limiter.acquire_at("ip:10.0.0.1", 1, now).allowed);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = InMemoryRateLimiter::new(1.0, 1.0).unwrap();
        let now = Instant::now();

        assert!(limiter.acquire_at("ip:10.0.0.1", 1, now).allowed);
        assert!(!limiter.acquire_at("ip:10.0.0.1", 1, now).allowed);

        // A depleted neighbour has no effect on a fresh identity.
        assert!(limiter.acquire_at("ip:10.0.0.2", 1, now).allowed);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[tokio::test]
    async fn test_no_double_spend_under_concurrency() {
        let limiter = Arc::new(InMemoryRateLimiter::new(1.0, 5.0).unwrap());
        let now = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire_at("ip:10.0.0.1", 1, now).allowed
            }));
        }

        let results = futures::future::join_all(handles).await;
        let admitted = results
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        // All twenty checks share one frozen clock, so exactly the five
        // banked tokens are spendable.
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_backend_trait_rejects_empty_identifier() {
        let limiter = InMemoryRateLimiter::new(1.0, 1.0).unwrap();
        assert!(RateLimiterBackend::acquire(&limiter, "", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_backend_trait_acquire() {
        let limiter = InMemoryRateLimiter::new(1.0, 1.0).unwrap();
        let decision = RateLimiterBackend::acquire(&limiter, "ip:10.0.0.1", 1)
            .await
            .unwrap();
        assert!(decision.allowed);
    }
}
