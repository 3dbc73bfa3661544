//! Rate limiter trait for abstracting local and distributed implementations.

use async_trait::async_trait;

use crate::error::Result;

use super::bucket::RateLimitDecision;

/// Trait for rate limiter backends.
///
/// This trait abstracts over the local `InMemoryRateLimiter` and the
/// Redis-backed `RedisRateLimiter` so the admission controller works with
/// either. The backend is chosen once at startup; nothing downstream
/// branches on which one it got.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Consume `tokens` for `identifier` if the bucket can pay for them.
    ///
    /// Allow/deny are ordinary return values; an `Err` means the backend
    /// could not evaluate the quota at all (store unreachable or timed out).
    async fn acquire(&self, identifier: &str, tokens: u32) -> Result<RateLimitDecision>;
}
