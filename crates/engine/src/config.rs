//! Engine configuration
//!
//! Loaded from a JSON file; every field has a default so a partial file
//! (or none at all) is valid.
//!
//! ```json
//! {
//!   "tick_interval_ms": 1000,
//!   "reload_interval_secs": 60,
//!   "trigger_cooldown_secs": 0,
//!   "standalone_symbols": ["BTC", "ETH"]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tripwire_core::canonical_symbol;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evaluation tick period. Zero disables the periodic scheduler; ticks
    /// then only run on demand.
    pub tick_interval_ms: u64,

    /// Definition reload period. Zero disables periodic reloads; reloads
    /// then only run when requested.
    pub reload_interval_secs: u64,

    /// Upper bound on a single (rule, symbol) evaluation
    pub pair_timeout_ms: u64,

    /// Evaluations allowed in flight at once within a tick
    pub max_concurrent_evaluations: usize,

    /// Minimum time between two logged triggers of the same (rule, symbol)
    pub trigger_cooldown_secs: u64,

    /// Upstream records buffered before the oldest are dropped
    pub ingest_queue_capacity: usize,

    /// Trigger events buffered for the writer before new ones are dropped
    pub trigger_queue_capacity: usize,

    /// Subscriber buffer for live trigger notifications
    pub notification_capacity: usize,

    pub write_max_retries: u32,
    pub write_retry_backoff_ms: u64,

    /// Hard cap on samples kept per (symbol, metric). Must exceed the
    /// samples a series receives over its longest window; past it the
    /// oldest samples go and those windows evaluate as unavailable.
    pub max_samples_per_series: usize,

    /// How far behind wall-clock time live evaluation runs
    pub evaluation_lag_ms: u64,

    /// Symbols evaluated for enabled signals that belong to no pool
    pub standalone_symbols: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            reload_interval_secs: 60,
            pair_timeout_ms: 250,
            max_concurrent_evaluations: 64,
            trigger_cooldown_secs: 0,
            ingest_queue_capacity: 10_000,
            trigger_queue_capacity: 1_000,
            notification_capacity: 1_024,
            write_max_retries: 3,
            write_retry_backoff_ms: 200,
            max_samples_per_series: 100_000,
            evaluation_lag_ms: 0,
            standalone_symbols: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string and validate it
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pair_timeout_ms == 0 {
            return Err(ConfigError::Invalid("pair_timeout_ms must be > 0".into()));
        }
        if self.max_concurrent_evaluations == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_evaluations must be > 0".into(),
            ));
        }
        if self.ingest_queue_capacity == 0
            || self.trigger_queue_capacity == 0
            || self.notification_capacity == 0
        {
            return Err(ConfigError::Invalid("queue capacities must be > 0".into()));
        }
        if self.max_samples_per_series < 2 {
            return Err(ConfigError::Invalid(
                "max_samples_per_series must be >= 2".into(),
            ));
        }
        Ok(())
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval_secs = interval.as_secs();
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.trigger_cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn with_standalone_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.standalone_symbols = symbols
            .into_iter()
            .map(|s| canonical_symbol(s.as_ref()))
            .collect();
        self
    }

    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_interval_ms > 0).then(|| Duration::from_millis(self.tick_interval_ms))
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval_secs > 0).then(|| Duration::from_secs(self.reload_interval_secs))
    }

    pub fn pair_timeout(&self) -> Duration {
        Duration::from_millis(self.pair_timeout_ms)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.trigger_cooldown_secs as i64)
    }

    pub fn evaluation_lag(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.evaluation_lag_ms as i64)
    }

    pub fn write_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.write_retry_backoff_ms)
    }
}
