//! Configuration management for the query gate.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use querygate_server::config::GateConfig;
//!
//! // Load from file with env overrides
//! let config = GateConfig::load("querygate.yaml")?;
//!
//! // Or load from environment only
//! let config = GateConfig::from_env()?;
//! ```
//!
//! # Example YAML Configuration
//!
//! ```yaml
//! cache:
//!   max_size_bytes: 10485760
//!   ttl_overrides:
//!     - operation: GetAccountTypeOptions
//!       ttl: never
//!     - operation: GetTransactions
//!       ttl: 60
//! batching:
//!   window_ms: 5
//! invalidation:
//!   rules:
//!     - mutation: UpdateAccount
//!       patterns: ["GetAccounts*", "GetNetWorth"]
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use querygate_domain::cache::{CacheStoreConfig, DEFAULT_MAX_SIZE_BYTES};
use querygate_domain::{InvalidationPattern, InvalidationRules, TtlPolicy, TtlResolver};
use serde::{Deserialize, Serialize};

use crate::handlers::batch::BatchConfig;
use crate::observability::LoggingConfig;

/// Gate configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GateConfig {
    /// Result cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Time-window batching settings
    #[serde(default)]
    pub batching: BatchingSettings,

    /// In-flight deduplication settings
    #[serde(default)]
    pub deduplication: DeduplicationSettings,

    /// Counter settings
    #[serde(default)]
    pub metrics: MetricsSettings,

    /// Transport deadline settings
    #[serde(default)]
    pub transport: TransportSettings,

    /// Mutation invalidation rules
    #[serde(default)]
    pub invalidation: InvalidationSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Result cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// When disabled, every read goes to the transport.
    ///
    /// Environment variable: `QUERYGATE_CACHE__ENABLED`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ceiling on the summed approximate size of cached entries.
    ///
    /// Environment variable: `QUERYGATE_CACHE__MAX_SIZE_BYTES`
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,

    /// Per-operation TTLs that replace the volatility class default.
    #[serde(default)]
    pub ttl_overrides: Vec<TtlOverride>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: default_max_size_bytes(),
            ttl_overrides: Vec::new(),
        }
    }
}

fn default_max_size_bytes() -> usize {
    DEFAULT_MAX_SIZE_BYTES
}

/// A TTL override for one operation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TtlOverride {
    pub operation: String,
    /// Seconds, or `never`.
    pub ttl: TtlPolicy,
}

/// Time-window batching settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BatchingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long the first pending read waits for companions.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// A batch reaching this size flushes immediately.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: default_window_ms(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_window_ms() -> u64 {
    10
}

fn default_max_batch_size() -> usize {
    10
}

/// In-flight deduplication settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DeduplicationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DeduplicationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Counter settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// When disabled, no counter is recorded.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Transport deadline settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TransportSettings {
    /// Deadline for one transport invocation, single or grouped.
    ///
    /// Environment variable: `QUERYGATE_TRANSPORT__TIMEOUT_MS`
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Mutation invalidation rules.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct InvalidationSettings {
    #[serde(default)]
    pub rules: Vec<InvalidationRule>,
}

/// Patterns invalidated after a successful mutation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InvalidationRule {
    pub mutation: String,
    pub patterns: Vec<InvalidationPattern>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format for logs
    #[serde(default)]
    pub json: bool,

    /// Log entering and leaving gate spans such as `execute`
    #[serde(default)]
    pub include_spans: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            include_spans: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigLoadError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigLoadError::Invalid {
            message: message.into(),
        }
    }
}

const ENV_PREFIX: &str = "QUERYGATE";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl GateConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `QUERYGATE_` and use `__` as
    /// separator. For example:
    /// - `QUERYGATE_CACHE__MAX_SIZE_BYTES=1048576` overrides `cache.max_size_bytes`
    /// - `QUERYGATE_BATCHING__ENABLED=false` overrides `batching.enabled`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&GateConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let gate_config: GateConfig = config.try_deserialize()?;
        gate_config.validate()?;

        Ok(gate_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&GateConfig::default())?)
            .add_source(env_source())
            .build()?;

        let gate_config: GateConfig = config.try_deserialize()?;
        gate_config.validate()?;

        Ok(gate_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.cache.enabled && self.cache.max_size_bytes == 0 {
            return Err(ConfigLoadError::invalid(
                "cache.max_size_bytes must be greater than 0 when caching is enabled",
            ));
        }

        if let Some(entry) = self
            .cache
            .ttl_overrides
            .iter()
            .find(|entry| entry.operation.trim().is_empty())
        {
            return Err(ConfigLoadError::invalid(format!(
                "cache.ttl_overrides contains an entry without an operation name (ttl: {:?})",
                entry.ttl
            )));
        }

        if self.batching.enabled {
            if self.batching.window_ms == 0 {
                return Err(ConfigLoadError::invalid(
                    "batching.window_ms must be greater than 0 when batching is enabled",
                ));
            }
            if self.batching.max_batch_size == 0 {
                return Err(ConfigLoadError::invalid(
                    "batching.max_batch_size must be greater than 0 when batching is enabled",
                ));
            }
        }

        if self.transport.timeout_ms == 0 {
            return Err(ConfigLoadError::invalid(
                "transport.timeout_ms must be greater than 0",
            ));
        }

        for rule in &self.invalidation.rules {
            if rule.mutation.trim().is_empty() {
                return Err(ConfigLoadError::invalid(
                    "invalidation.rules contains a rule without a mutation name",
                ));
            }
            if rule.patterns.is_empty() {
                return Err(ConfigLoadError::invalid(format!(
                    "invalidation rule for '{}' has no patterns",
                    rule.mutation
                )));
            }
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigLoadError::invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                VALID_LOG_LEVELS, self.logging.level
            )));
        }

        Ok(())
    }

    /// Deadline applied to each transport invocation.
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.timeout_ms)
    }

    pub fn cache_store_config(&self) -> CacheStoreConfig {
        let ceiling = self.cache.max_size_bytes;
        CacheStoreConfig::default().with_max_size_bytes(ceiling)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            window: Duration::from_millis(self.batching.window_ms),
            max_batch_size: self.batching.max_batch_size,
            timeout: self.transport_timeout(),
        }
    }

    /// Builds the TTL resolver; later entries win for repeated operations.
    pub fn ttl_resolver(&self) -> TtlResolver {
        self.cache
            .ttl_overrides
            .iter()
            .fold(TtlResolver::default(), |resolver, entry| {
                resolver.with_override(entry.operation.clone(), entry.ttl)
            })
    }

    /// Builds the mutation rules; repeated mutations accumulate patterns.
    pub fn invalidation_rules(&self) -> InvalidationRules {
        self.invalidation
            .rules
            .iter()
            .fold(InvalidationRules::default(), |rules, rule| {
                rules.with_rule(rule.mutation.clone(), rule.patterns.iter().cloned())
            })
    }

    /// Logging configuration for [`crate::observability::init_logging`].
    ///
    /// Falls back to INFO for a level that does not parse; `validate` rejects
    /// those earlier.
    pub fn logging_config(&self) -> LoggingConfig {
        let level = self
            .logging
            .level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO);
        let config = if self.logging.json {
            LoggingConfig::json()
        } else {
            LoggingConfig::text()
        };
        let config = config.with_level(level);
        if self.logging.include_spans {
            config.with_spans()
        } else {
            config
        }
    }
}

// QUERYGATE_CACHE__MAX_SIZE_BYTES -> cache.max_size_bytes
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
