//! Bus configuration.
//!
//! Loaded externally (file, environment) and handed to the bus as a plain
//! struct. Durations serialize as milliseconds.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Runtime options for the bus core.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Reserved for future backpressure.
    pub max_queue_size: usize,

    /// Command deadline when the envelope carries no override.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_command_timeout: Duration,

    /// Query deadline when the query carries none.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_query_timeout: Duration,

    /// TTL for cached responses when the query carries none.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_cache_ttl: Duration,

    /// Maximum number of cached responses before LRU eviction.
    pub cache_max_entries: usize,

    /// Reject (commands, queries) or skip (events) messages that violate
    /// the layer graph.
    pub strict_routing_enforcement: bool,

    /// Honor the `bypass-routing` metadata flag.
    pub allow_routing_bypass: bool,

    /// Emit a `TraceRecord` per operation.
    pub enable_tracing: bool,

    /// Maintain counters and forward them to the metrics sink.
    pub enable_metrics: bool,

    /// Upper bound on a single event handler's run time. `None` lets
    /// `publish` wait for handlers indefinitely.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub event_handler_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            default_command_timeout: Duration::from_secs(30),
            default_query_timeout: Duration::from_secs(10),
            default_cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            strict_routing_enforcement: true,
            allow_routing_bypass: false,
            enable_tracing: false,
            enable_metrics: true,
            event_handler_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_MAX_QUEUE_SIZE` (default: 1000)
    /// - `BUS_COMMAND_TIMEOUT_MS` (default: 30000)
    /// - `BUS_QUERY_TIMEOUT_MS` (default: 10000)
    /// - `BUS_CACHE_TTL_MS` (default: 300000)
    /// - `BUS_CACHE_MAX_ENTRIES` (default: 1000)
    /// - `BUS_STRICT_ROUTING` (default: true)
    /// - `BUS_ALLOW_ROUTING_BYPASS` (default: false)
    /// - `BUS_ENABLE_TRACING` (default: false)
    /// - `BUS_ENABLE_METRICS` (default: true)
    /// - `BUS_EVENT_HANDLER_TIMEOUT_MS` (default: 30000, `0` disables the bound)
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_queue_size: env_parse("BUS_MAX_QUEUE_SIZE").unwrap_or(defaults.max_queue_size),
            default_command_timeout: env_millis("BUS_COMMAND_TIMEOUT_MS")
                .unwrap_or(defaults.default_command_timeout),
            default_query_timeout: env_millis("BUS_QUERY_TIMEOUT_MS")
                .unwrap_or(defaults.default_query_timeout),
            default_cache_ttl: env_millis("BUS_CACHE_TTL_MS").unwrap_or(defaults.default_cache_ttl),
            cache_max_entries: env_parse("BUS_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            strict_routing_enforcement: env_flag("BUS_STRICT_ROUTING")
                .unwrap_or(defaults.strict_routing_enforcement),
            allow_routing_bypass: env_flag("BUS_ALLOW_ROUTING_BYPASS")
                .unwrap_or(defaults.allow_routing_bypass),
            enable_tracing: env_flag("BUS_ENABLE_TRACING").unwrap_or(defaults.enable_tracing),
            enable_metrics: env_flag("BUS_ENABLE_METRICS").unwrap_or(defaults.enable_metrics),
            event_handler_timeout: match env_millis("BUS_EVENT_HANDLER_TIMEOUT_MS") {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.event_handler_timeout,
            },
        }
    }

    /// Permissive settings for local development: routing violations are
    /// logged instead of rejected, bypass is honored, tracing is on.
    pub fn development() -> Self {
        Self {
            strict_routing_enforcement: false,
            allow_routing_bypass: true,
            enable_tracing: true,
            ..Self::default()
        }
    }

    /// Strict settings: no bypass, shorter deadlines.
    pub fn production() -> Self {
        Self {
            default_command_timeout: Duration::from_secs(10),
            default_query_timeout: Duration::from_secs(5),
            strict_routing_enforcement: true,
            allow_routing_bypass: false,
            ..Self::default()
        }
    }

    /// Check that every bound is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ZeroValue` for zero timeouts, TTL or cache size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_command_timeout.is_zero() {
            return Err(ConfigError::ZeroValue {
                field: "default_command_timeout",
            });
        }
        if self.default_query_timeout.is_zero() {
            return Err(ConfigError::ZeroValue {
                field: "default_query_timeout",
            });
        }
        if self.default_cache_ttl.is_zero() {
            return Err(ConfigError::ZeroValue {
                field: "default_cache_ttl",
            });
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::ZeroValue {
                field: "cache_max_entries",
            });
        }
        if self.event_handler_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroValue {
                field: "event_handler_timeout",
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable bus setting");
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => {
            warn!(key, value = %raw, "Ignoring unparseable bus flag");
            None
        }
    }
}
