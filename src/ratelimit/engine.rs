//! Admission control: the single entry point the request path calls.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::FloodgateConfig;
use crate::error::Result;

use super::backend::RateLimiterBackend;
use super::bucket::RateLimitDecision;
use super::bypass::BypassStore;
use super::distributed::{RedisLimiterOptions, RedisRateLimiter};
use super::identity::ClientIdentity;
use super::local::InMemoryRateLimiter;

/// Wire shape of the deny response body.
///
/// The HTTP layer serializes this into the 429 it answers with:
/// `{"error": "rate_limited", "retry_after": 2.0}`.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitedBody {
    /// Always `"rate_limited"`.
    pub error: &'static str,
    /// Seconds until a retry can succeed, fractional.
    pub retry_after: f64,
}

impl RateLimitedBody {
    /// Build the body for a denial.
    pub fn new(retry_after: f64) -> Self {
        Self {
            error: "rate_limited",
            retry_after: retry_after.max(0.0),
        }
    }

    /// Value for the `Retry-After` header: whole seconds, rounded up,
    /// never less than 1.
    pub fn retry_after_header_secs(&self) -> u64 {
        (self.retry_after.ceil() as u64).max(1)
    }
}

/// Decides, for every inbound request, whether to admit it.
///
/// Consults the bypass registry first, then the configured limiter backend.
/// The backend is chosen once at construction and held for the process
/// lifetime.
pub struct AdmissionController {
    limiter: Arc<dyn RateLimiterBackend>,
    bypass: Arc<BypassStore>,
    tokens_per_request: u32,
}

impl AdmissionController {
    /// Create a controller over an already-built limiter backend.
    pub fn new(limiter: Arc<dyn RateLimiterBackend>, bypass: Arc<BypassStore>) -> Self {
        Self {
            limiter,
            bypass,
            tokens_per_request: 1,
        }
    }

    /// Charge more than one token per admitted request.
    pub fn with_tokens_per_request(mut self, tokens: u32) -> Self {
        self.tokens_per_request = tokens.max(1);
        self
    }

    /// Build a controller from configuration, selecting the backend.
    ///
    /// A configured `redis_url` selects the distributed limiter; otherwise
    /// quotas stay process-local. Configuration is validated before any
    /// connection is attempted.
    pub async fn from_config(config: &FloodgateConfig, bypass: Arc<BypassStore>) -> Result<Self> {
        config.validate()?;
        let rl = &config.rate_limiting;

        let limiter: Arc<dyn RateLimiterBackend> = match &rl.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let conn = ConnectionManager::new(client).await?;
                info!(burst = rl.burst, rate = rl.rate_per_second, "Using distributed rate limiter");
                Arc::new(RedisRateLimiter::with_options(
                    rl.rate_per_second,
                    rl.burst as f64,
                    conn,
                    RedisLimiterOptions {
                        key_prefix: rl.key_prefix.clone(),
                        ttl_multiplier: rl.ttl_multiplier,
                        acquire_timeout: Duration::from_millis(rl.acquire_timeout_ms),
                    },
                )?)
            }
            None => {
                info!(burst = rl.burst, rate = rl.rate_per_second, "Using local rate limiter");
                Arc::new(InMemoryRateLimiter::new(
                    rl.rate_per_second,
                    rl.burst as f64,
                )?)
            }
        };

        Ok(Self::new(limiter, bypass))
    }

    /// The bypass registry this controller consults.
    pub fn bypass(&self) -> &Arc<BypassStore> {
        &self.bypass
    }

    /// Decide whether to admit a request from `client`.
    ///
    /// Bypassed addresses are admitted without touching any bucket. Each of
    /// the client's identifiers is charged in order and the first denial
    /// wins. A backend failure fails open: the request is admitted and the
    /// degradation logged, so a quota-store outage costs enforcement rather
    /// than availability.
    pub async fn admit(&self, client: &ClientIdentity) -> RateLimitDecision {
        if self.bypass.is_bypassed(client.ip) {
            debug!(ip = ?client.ip, "Client bypasses rate limiting");
            return RateLimitDecision::allowed();
        }

        for identifier in client.identifiers() {
            match self
                .limiter
                .acquire(&identifier, self.tokens_per_request)
                .await
            {
                Ok(decision) if !decision.allowed => {
                    debug!(
                        identifier = %identifier,
                        retry_after = decision.retry_after,
                        "Rate limit exceeded"
                    );
                    return decision;
                }
                Ok(_) => {}
                Err(error) => {
                    // Fail open: enforcement degrades, traffic does not.
                    warn!(
                        identifier = %identifier,
                        error = %error,
                        "Rate limit check failed, admitting request unmetered"
                    );
                    return RateLimitDecision::allowed();
                }
            }
        }

        RateLimitDecision::allowed()
    }
}
