//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};

use crate::error::{FloodgateError, Result};

/// Environment variable naming the optional YAML override file.
const CONFIG_FILE_ENV: &str = "FLOODGATE_CONFIG_FILE";

/// Main configuration for the Floodgate subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Sustained admission rate in tokens per second
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,

    /// Bucket capacity, i.e. how many requests may burst at once
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Connection URL for the shared quota store. Set, the distributed
    /// backend is used; unset, quotas are process-local.
    pub redis_url: Option<String>,

    /// Prefix for quota keys in the shared store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Idle-key TTL as a multiple of the passive full-refill time
    #[serde(default = "default_ttl_multiplier")]
    pub ttl_multiplier: f64,

    /// Upper bound in milliseconds on one quota store round trip
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// IP addresses seeded into the bypass registry at startup
    #[serde(default)]
    pub bypass: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rate_per_second: default_rate_per_second(),
            burst: default_burst(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            ttl_multiplier: default_ttl_multiplier(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            bypass: Vec::new(),
        }
    }
}

fn default_rate_per_second() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    5
}

fn default_key_prefix() -> String {
    "rate_limiter".to_string()
}

fn default_ttl_multiplier() -> f64 {
    2.0
}

fn default_acquire_timeout_ms() -> u64 {
    250
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| FloodgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment.
    ///
    /// An optional YAML file named by `FLOODGATE_CONFIG_FILE` is read first;
    /// `FLOODGATE_*` environment variables override it, with `__` separating
    /// nesting levels (`FLOODGATE_RATE_LIMITING__BURST=10`).
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FLOODGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: FloodgateConfig = builder
            .build()
            .map_err(|e| FloodgateError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| FloodgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on limits that cannot be enforced.
    ///
    /// Runs once at startup; admission checks never re-validate.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;

        if !rl.rate_per_second.is_finite() || rl.rate_per_second <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "rate_per_second must be greater than 0, got {}",
                rl.rate_per_second
            )));
        }
        if rl.burst < 1 {
            return Err(FloodgateError::Config(
                "burst must be at least 1".to_string(),
            ));
        }
        if !rl.ttl_multiplier.is_finite() || rl.ttl_multiplier <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "ttl_multiplier must be greater than 0, got {}",
                rl.ttl_multiplier
            )));
        }
        if rl.acquire_timeout_ms == 0 {
            return Err(FloodgateError::Config(
                "acquire_timeout_ms must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &rl.redis_url {
            if url.trim().is_empty() {
                return Err(FloodgateError::Config(
                    "redis_url must not be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Whether the distributed backend should be used.
    pub fn redis_enabled(&self) -> bool {
        self.rate_limiting.redis_url.is_some()
    }
}
