//! Pool configuration and the JSON pooling document.

use std::time::Duration;

use serde::Deserialize;

use crate::error::PoolError;

/// Configuration for one client's connection pool.
///
/// `queue_timeout` and `max_idle_time` distinguish "not configured"
/// (`None`: wait forever / never expire) from a configured zero duration.
/// A zero idle TTL expires an idle connection on the very next acquisition
/// check; a connection that is already checked out is unaffected until it
/// is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Whether pooling is enabled. When disabled, every acquisition opens a
    /// fresh connection and release closes it.
    pub enabled: bool,
    /// Maximum number of simultaneously open connections (idle + checked
    /// out). Must be at least 1.
    pub max_size: usize,
    /// How long an acquisition may queue when the pool is exhausted.
    pub queue_timeout: Option<Duration>,
    /// How long a connection may sit idle before it is discarded.
    pub max_idle_time: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 25,
            queue_timeout: None,
            max_idle_time: None,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the queue timeout.
    #[must_use]
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }

    /// Set the idle TTL.
    #[must_use]
    pub fn max_idle_time(mut self, ttl: Duration) -> Self {
        self.max_idle_time = Some(ttl);
        self
    }

    /// Validate invariants not expressible in the type.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size < 1 {
            return Err(PoolError::Config("maxSize must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse the JSON pooling document:
    ///
    /// ```json
    /// {"pooling": {"enabled": true, "maxSize": 10,
    ///              "queueTimeout": 1000, "maxIdleTime": 60000}}
    /// ```
    ///
    /// Timeouts are integral milliseconds. The `"pooling"` wrapper key is
    /// mandatory; non-integer numerics and unknown keys are configuration
    /// errors.
    pub fn from_json(document: &str) -> Result<Self, PoolError> {
        let doc: PoolingDocument = serde_json::from_str(document)
            .map_err(|e| PoolError::Config(format!("invalid pooling document: {e}")))?;

        let mut config = Self::default();
        let section = doc.pooling;
        if let Some(enabled) = section.enabled {
            config.enabled = enabled;
        }
        if let Some(max_size) = section.max_size {
            config.max_size = usize::try_from(max_size)
                .map_err(|_| PoolError::Config(format!("maxSize out of range: {max_size}")))?;
        }
        if let Some(ms) = section.queue_timeout {
            config.queue_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = section.max_idle_time {
            config.max_idle_time = Some(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolingDocument {
    pooling: PoolingSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PoolingSection {
    enabled: Option<bool>,
    max_size: Option<u64>,
    queue_timeout: Option<u64>,
    max_idle_time: Option<u64>,
}
