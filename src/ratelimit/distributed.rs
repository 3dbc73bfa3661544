//! Distributed rate limiter backed by a shared Redis store.
//!
//! Every broker process pointed at the same Redis enforces one quota per
//! identity. The whole read-refill-consume-write sequence runs inside a
//! single server-side Lua script, so two processes can never both observe
//! "tokens available" before either writes the decrement.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use crate::error::{FloodgateError, Result};

use super::backend::RateLimiterBackend;
use super::bucket::RateLimitDecision;

/// The atomic refill-and-consume step, evaluated server-side.
///
/// State per identity is a hash of `tokens` and `timestamp` (Unix seconds,
/// fractional). A missing key reads as a full bucket, which is exactly what
/// an expired idle identity should look like. `retry_after` travels back as
/// whole milliseconds because Redis truncates Lua numbers to integers on
/// reply.
const ACQUIRE_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl_ms = tonumber(ARGV[5])

local state = redis.call('HMGET', key, 'tokens', 'timestamp')
local tokens = tonumber(state[1])
local timestamp = tonumber(state[2])

if tokens == nil then
    tokens = capacity
end
if timestamp == nil then
    timestamp = now
end

local elapsed = math.max(0, now - timestamp)
tokens = math.min(capacity, tokens + elapsed * rate)

local allowed = 0
local retry_ms = 0
if tokens >= requested then
    tokens = tokens - requested
    allowed = 1
else
    retry_ms = math.ceil(((requested - tokens) / rate) * 1000)
end

redis.call('HSET', key, 'tokens', tokens, 'timestamp', now)
redis.call('PEXPIRE', key, ttl_ms)

return {allowed, retry_ms}
"#;

/// Tunables for the Redis-backed limiter.
#[derive(Debug, Clone)]
pub struct RedisLimiterOptions {
    /// Prefix for quota keys; a trailing `:` is stripped.
    pub key_prefix: String,
    /// Idle-key TTL as a multiple of the passive full-refill time
    /// (`capacity / rate`). Must be greater than 0.
    pub ttl_multiplier: f64,
    /// Upper bound on one store round trip. Must be nonzero.
    pub acquire_timeout: Duration,
}

impl Default for RedisLimiterOptions {
    fn default() -> Self {
        Self {
            key_prefix: "rate_limiter".to_string(),
            ttl_multiplier: 2.0,
            acquire_timeout: Duration::from_millis(250),
        }
    }
}

/// Token bucket limiter whose state lives in Redis.
pub struct RedisRateLimiter {
    rate: f64,
    capacity: f64,
    conn: ConnectionManager,
    script: Script,
    key_prefix: String,
    ttl_ms: u64,
    acquire_timeout: Duration,
}

impl RedisRateLimiter {
    /// Create a limiter with default options.
    pub fn new(rate: f64, capacity: f64, conn: ConnectionManager) -> Result<Self> {
        Self::with_options(rate, capacity, conn, RedisLimiterOptions::default())
    }

    /// Create a limiter with explicit options.
    pub fn with_options(
        rate: f64,
        capacity: f64,
        conn: ConnectionManager,
        options: RedisLimiterOptions,
    ) -> Result<Self> {
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
        if !options.ttl_multiplier.is_finite() || options.ttl_multiplier <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "ttl multiplier must be greater than 0, got {}",
                options.ttl_multiplier
            )));
        }
        if options.acquire_timeout.is_zero() {
            return Err(FloodgateError::Config(
                "acquire timeout must be nonzero".to_string(),
            ));
        }

        // The TTL covers the time for an untouched bucket to passively
        // refill to capacity, so expiry is indistinguishable from idleness.
        let ttl_seconds = (capacity / rate * options.ttl_multiplier).max(1.0);
        let ttl_ms = (ttl_seconds * 1000.0).ceil() as u64;

        debug!(
            rate = rate,
            capacity = capacity,
            ttl_ms = ttl_ms,
            key_prefix = %options.key_prefix,
            "Creating Redis rate limiter"
        );

        Ok(Self {
            rate,
            capacity,
            conn,
            script: Script::new(ACQUIRE_SCRIPT),
            key_prefix: options.key_prefix.trim_end_matches(':').to_string(),
            ttl_ms,
            acquire_timeout: options.acquire_timeout,
        })
    }

    fn key_for(&self, identifier: &str) -> String {
        format!("{}:{}", self.key_prefix, identifier)
    }

    fn unix_now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

#[async_trait]
impl RateLimiterBackend for RedisRateLimiter {
    async fn acquire(&self, identifier: &str, tokens: u32) -> Result<RateLimitDecision> {
        if identifier.is_empty() {
            return Err(FloodgateError::Config(
                "identifier must be provided".to_string(),
            ));
        }

        let key = self.key_for(identifier);
        let now = Self::unix_now();

        // ConnectionManager clones share the underlying multiplexed
        // connection and reconnect on their own after failures.
        let mut conn = self.conn.clone();
        let invocation = async {
            self.script
                .key(&key)
                .arg(self.rate)
                .arg(self.capacity)
                .arg(now)
                .arg(tokens as f64)
                .arg(self.ttl_ms)
                .invoke_async(&mut conn)
                .await
        };

        let (allowed, retry_ms): (i64, i64) = tokio::time::timeout(self.acquire_timeout, invocation)
            .await
            .map_err(|_| FloodgateError::StoreTimeout(self.acquire_timeout.as_millis() as u64))??;

        let decision = if allowed == 1 {
            RateLimitDecision::allowed()
        } else {
            RateLimitDecision::denied(retry_ms as f64 / 1000.0)
        };

        trace!(
            identifier = %identifier,
            allowed = decision.allowed,
            retry_after = decision.retry_after,
            "Checked distributed rate limit"
        );
        Ok(decision)
    }
}

// These tests need a live Redis; point REDIS_URL at one and run with
// `cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> ConnectionManager {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let client = redis::Client::open(url).unwrap();
        ConnectionManager::new(client).await.unwrap()
    }

    fn unique_prefix(name: &str) -> String {
        format!(
            "floodgate_test:{}:{}",
            name,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    async fn limiter(rate: f64, capacity: f64, prefix: &str) -> RedisRateLimiter {
        RedisRateLimiter::with_options(
            rate,
            capacity,
            connect().await,
            RedisLimiterOptions {
                key_prefix: prefix.to_string(),
                ..RedisLimiterOptions::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_rejects_invalid_limits() {
        let conn = connect().await;
        assert!(
            RedisRateLimiter::with_options(0.0, 5.0, conn.clone(), RedisLimiterOptions::default())
                .is_err()
        );
        assert!(RedisRateLimiter::with_options(
            1.0,
            5.0,
            conn,
            RedisLimiterOptions {
                ttl_multiplier: 0.0,
                ..RedisLimiterOptions::default()
            }
        )
        .is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_burst_ceiling() {
        let prefix = unique_prefix("burst");
        let limiter = limiter(1.0, 5.0, &prefix).await;

        for i in 1..=5 {
            let decision = limiter.acquire("ip:198.51.100.10", 1).await.unwrap();
            assert!(decision.allowed, "request {i} should be admitted");
        }

        let decision = limiter.acquire("ip:198.51.100.10", 1).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after > 0.9 && decision.retry_after <= 1.1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_refill_recovery() {
        let prefix = unique_prefix("refill");
        let limiter = limiter(10.0, 1.0, &prefix).await;

        assert!(limiter.acquire("ip:198.51.100.10", 1).await.unwrap().allowed);
        let denied = limiter.acquire("ip:198.51.100.10", 1).await.unwrap();
        assert!(!denied.allowed);

        tokio::time::sleep(Duration::from_secs_f64(denied.retry_after + 0.01)).await;
        assert!(limiter.acquire("ip:198.51.100.10", 1).await.unwrap().allowed);
        assert!(!limiter.acquire("ip:198.51.100.10", 1).await.unwrap().allowed);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_parity_across_instances() {
        // Two limiter instances stand in for two broker processes; the
        // aggregate admission count must match what a single local limiter
        // would grant.
        let prefix = unique_prefix("parity");
        let a = limiter(1.0, 6.0, &prefix).await;
        let b = limiter(1.0, 6.0, &prefix).await;

        let mut admitted = 0;
        for i in 0..20 {
            let limiter = if i % 2 == 0 { &a } else { &b };
            if limiter.acquire("ip:198.51.100.10", 1).await.unwrap().allowed {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 6);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_identities_are_independent() {
        let prefix = unique_prefix("independent");
        let limiter = limiter(1.0, 1.0, &prefix).await;

        assert!(limiter.acquire("ip:198.51.100.10", 1).await.unwrap().allowed);
        assert!(!limiter.acquire("ip:198.51.100.10", 1).await.unwrap().allowed);
        assert!(limiter.acquire("ip:198.51.100.11", 1).await.unwrap().allowed);
    }
}
