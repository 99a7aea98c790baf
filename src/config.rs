//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/evb.toml` by default)
//! 2. environment variables prefixed with `RUST_EVB_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use rust_evb::config::EvbConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EvbConfig::load()?;
//! config.validate()?;
//! println!("expecting {} sources", config.builder.num_channels);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, EvbError};
use evb_format::EventTag;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/evb.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvbConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Event assembly settings
    pub builder: BuilderConfig,
    /// Network endpoints
    #[serde(default)]
    pub transport: TransportConfig,
    /// Metrics reporting
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used in log output
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Pretty-printed format with colors (for development)
    #[default]
    Pretty,
    /// Compact format without colors (for production)
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Event assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Number of sources a physics event must collect
    pub num_channels: usize,
    /// Age after which the oldest pending event is forced out, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Grace period between a stop request and the end of the loop, in milliseconds
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Pending events allowed per class before the oldest is evicted (0 = unlimited)
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// BCID difference tolerated before a mismatch is counted
    #[serde(default)]
    pub bcid_tolerance: u16,
    /// Sleep after a pass that received nothing, in milliseconds
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Emit still-pending events as incomplete when stopping
    #[serde(default)]
    pub flush_pending_on_stop: bool,
}

impl BuilderConfig {
    /// Configuration with defaults for everything but the channel count.
    pub fn with_channels(num_channels: usize) -> Self {
        Self {
            num_channels,
            timeout_ms: default_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            max_pending: default_max_pending(),
            bcid_tolerance: 0,
            idle_backoff_ms: default_idle_backoff_ms(),
            flush_pending_on_stop: false,
        }
    }

    /// Event staleness limit.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Shutdown grace period.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Idle back-off between empty passes.
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

/// Network endpoint configuration for the UDP transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Local address to bind for each input channel, in channel order
    #[serde(default)]
    pub inputs: Vec<SocketAddr>,
    /// Destination for each output class; classes without an entry are not sent
    #[serde(default)]
    pub outputs: BTreeMap<EventTag, SocketAddr>,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Interval between metric reports, in milliseconds
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// Log each report as a single JSON line
    #[serde(default)]
    pub json: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: default_report_interval_ms(),
            json: false,
        }
    }
}

impl MetricsConfig {
    /// Interval between metric reports.
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

// Default value functions
fn default_name() -> String {
    "rust-evb".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

fn default_max_pending() -> usize {
    1000
}

fn default_idle_backoff_ms() -> u64 {
    10
}

fn default_report_interval_ms() -> u64 {
    1000
}

impl EvbConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override file values with prefix RUST_EVB_
    /// Example: RUST_EVB_BUILDER__TIMEOUT_MS=250
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_EVB_").split("__"))
            .extract()?)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml_str(source: &str) -> AppResult<Self> {
        Ok(Figment::from(Toml::string(source)).extract()?)
    }

    /// Render the resolved configuration as TOML
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| EvbError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(EvbError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        // fragment_count is a single byte on the wire
        if self.builder.num_channels == 0 || self.builder.num_channels > u8::MAX as usize {
            return Err(EvbError::Configuration(format!(
                "Invalid num_channels {}. Must be 1-255",
                self.builder.num_channels
            )));
        }

        if self.builder.timeout_ms == 0 {
            return Err(EvbError::Configuration(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !self.transport.inputs.is_empty()
            && self.transport.inputs.len() != self.builder.num_channels
        {
            return Err(EvbError::Configuration(format!(
                "transport.inputs lists {} addresses but num_channels is {}",
                self.transport.inputs.len(),
                self.builder.num_channels
            )));
        }

        Ok(())
    }
}
