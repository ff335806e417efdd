//! Session configuration: algorithm/backend selection and the fluent,
//! validating builder assembling them.
//!
//! Grounded on the teacher's `QuotaBuilder` (`Option<T>` fields, fluent
//! setters, a validating `build()`); the many keyword aliases the source
//! spec mentions (`type`, `ratelimiter`, `ratelimit`, ...) collapse into the
//! single [`AlgorithmConfig`] enum per `SPEC_FULL.md` §9.

use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Algorithm selection plus its parameters, validated at construction.
#[derive(Debug, Clone)]
pub enum AlgorithmConfig {
    SlidingWindow { limit: u64, window: Duration },
    FixedWindow { limit: u64, window: Duration },
    LeakyBucket { capacity: f64, leak_rate: f64 },
    TokenBucket { capacity: f64, fill_rate: f64 },
    Gcra { period: Duration, limit: u64 },
}

/// Backend selection plus its connection parameters.
#[derive(Debug, Clone, Default)]
pub enum BackendConfig {
    #[default]
    Memory,
    #[cfg(feature = "kv")]
    Kv(crate::backend::kv::KvConfig),
    #[cfg(feature = "sql")]
    Sql(crate::backend::sql::SqlConfig),
}

/// Scope toggles plus the shared namespace prefix, cache TTL, and dispatch
/// knobs recognized per §6.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub key: String,
    pub algorithm: AlgorithmConfig,
    pub backend: BackendConfig,
    pub per_host: bool,
    pub per_endpoint: bool,
    pub cache_enabled: bool,
    pub cache_timeout: Duration,
    pub sleep_duration: Duration,
    pub raise_errors: bool,
    pub return_callbacks: bool,
    pub worker_count: usize,
    pub request_timeout: Duration,
    pub max_cas_attempts: u32,
    pub check_frequency: Option<Duration>,
}

impl SessionConfig {
    pub fn builder(algorithm: AlgorithmConfig) -> SessionConfigBuilder {
        SessionConfigBuilder::new(algorithm)
    }
}

/// Fluent, validating builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    key: Option<String>,
    algorithm: AlgorithmConfig,
    backend: BackendConfig,
    per_host: bool,
    per_endpoint: bool,
    cache_enabled: bool,
    cache_timeout: Duration,
    sleep_duration: Duration,
    raise_errors: bool,
    return_callbacks: bool,
    worker_count: usize,
    request_timeout: Duration,
    max_cas_attempts: u32,
    check_frequency: Option<Duration>,
}

impl SessionConfigBuilder {
    pub fn new(algorithm: AlgorithmConfig) -> Self {
        Self {
            key: None,
            algorithm,
            backend: BackendConfig::default(),
            per_host: false,
            per_endpoint: false,
            cache_enabled: false,
            cache_timeout: Duration::from_secs(300),
            sleep_duration: Duration::from_millis(100),
            raise_errors: false,
            return_callbacks: false,
            worker_count: 8,
            request_timeout: Duration::from_secs(30),
            max_cas_attempts: 8,
            check_frequency: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn per_host(mut self, enabled: bool) -> Self {
        self.per_host = enabled;
        self
    }

    pub fn per_endpoint(mut self, enabled: bool) -> Self {
        self.per_endpoint = enabled;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn cache_timeout(mut self, ttl: Duration) -> Self {
        self.cache_timeout = ttl;
        self
    }

    pub fn sleep_duration(mut self, duration: Duration) -> Self {
        self.sleep_duration = duration;
        self
    }

    pub fn raise_errors(mut self, enabled: bool) -> Self {
        self.raise_errors = enabled;
        self
    }

    pub fn return_callbacks(mut self, enabled: bool) -> Self {
        self.return_callbacks = enabled;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts;
        self
    }

    /// Override the memory backend's background sweep cadence. Only
    /// meaningful when [`BackendConfig::Memory`] is selected; ignored by the
    /// KV and SQL backends, which expire entries on their own terms.
    pub fn check_frequency(mut self, interval: Duration) -> Self {
        self.check_frequency = Some(interval);
        self
    }

    /// Validate and assemble the config.
    pub fn build(self) -> Result<SessionConfig> {
        let key = self.key.ok_or_else(|| ConfigError::MissingRequired("key".into()))?;
        if key.is_empty() {
            return Err(ConfigError::InvalidBackend("key must not be empty".into()).into());
        }
        validate_algorithm(&self.algorithm)?;
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidBackend("worker_count must be > 0".into()).into());
        }

        Ok(SessionConfig {
            key,
            algorithm: self.algorithm,
            backend: self.backend,
            per_host: self.per_host,
            per_endpoint: self.per_endpoint,
            cache_enabled: self.cache_enabled,
            cache_timeout: self.cache_timeout,
            sleep_duration: self.sleep_duration,
            raise_errors: self.raise_errors,
            return_callbacks: self.return_callbacks,
            worker_count: self.worker_count,
            request_timeout: self.request_timeout,
            max_cas_attempts: self.max_cas_attempts,
            check_frequency: self.check_frequency,
        })
    }
}

fn validate_algorithm(config: &AlgorithmConfig) -> Result<()> {
    match config {
        AlgorithmConfig::SlidingWindow { limit, window } | AlgorithmConfig::FixedWindow { limit, window } => {
            if *limit == 0 {
                return Err(ConfigError::InvalidAlgorithm("limit must be > 0".into()).into());
            }
            if window.is_zero() {
                return Err(ConfigError::InvalidAlgorithm("window must be > 0".into()).into());
            }
        }
        AlgorithmConfig::LeakyBucket { capacity, leak_rate } => {
            if *capacity <= 0.0 || *leak_rate <= 0.0 {
                return Err(ConfigError::InvalidAlgorithm("capacity and leak_rate must be > 0".into()).into());
            }
        }
        AlgorithmConfig::TokenBucket { capacity, fill_rate } => {
            if *capacity <= 0.0 || *fill_rate <= 0.0 {
                return Err(ConfigError::InvalidAlgorithm("capacity and fill_rate must be > 0".into()).into());
            }
        }
        AlgorithmConfig::Gcra { period, limit } => {
            if period.is_zero() || *limit == 0 {
                return Err(ConfigError::InvalidAlgorithm("period and limit must be > 0".into()).into());
            }
        }
    }
    Ok(())
}
