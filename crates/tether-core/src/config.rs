//! Runtime configuration
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! `TETHER_<SECTION>_<KEY>` environment variables, then explicit
//! `section.key=value` overrides from the command line. [`TetherConfig::validate`]
//! runs once after all layers are applied.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{Result, TetherError};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "TETHER_";

/// Pending-exchange correlator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Deadline applied to a device request when the caller gives none
    pub default_timeout_ms: u64,
    /// How long finalized keys are remembered to flag duplicate deliveries
    pub finalized_retention_ms: u64,
    /// Interval between expiration sweeps
    pub sweep_interval_ms: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            finalized_retention_ms: 60_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl CorrelatorConfig {
    /// Default request deadline
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Tombstone retention window
    pub fn finalized_retention(&self) -> Duration {
        Duration::from_millis(self.finalized_retention_ms)
    }

    /// Sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Session registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are treated as lost; `0` disables eviction
    pub idle_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 600_000,
        }
    }
}

impl SessionConfig {
    /// Idle timeout, `None` when eviction is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

/// RPC ledger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on requested page sizes
    pub max_page_size: usize,
    /// Rows older than this are deleted by the cleanup sweep; `0` disables cleanup
    pub ttl_ms: u64,
    /// Interval between cleanup sweeps
    pub cleanup_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_page_size: 1_000,
            ttl_ms: 0,
            cleanup_interval_ms: 3_600_000,
        }
    }
}

impl LedgerConfig {
    /// Row retention, `None` when cleanup is disabled
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    /// Cleanup interval
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Stats reporting settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Emit periodic counter reports
    pub enabled: bool,
    /// Interval between reports; counters reset after each one
    pub report_interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_ms: 60_000,
        }
    }
}

impl StatsConfig {
    /// Report interval
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Correlator settings
    pub correlator: CorrelatorConfig,
    /// Session registry settings
    pub sessions: SessionConfig,
    /// Ledger settings
    pub ledger: LedgerConfig,
    /// Stats settings
    pub stats: StatsConfig,
}

impl TetherConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TetherError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `TETHER_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_env_vars(std::env::vars())
    }

    /// Apply `TETHER_<SECTION>_<KEY>` pairs, ignoring unrelated variables
    pub fn merge_env_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let rest = rest.to_ascii_lowercase();
            let Some((section, key)) = rest.split_once('_') else {
                return Err(TetherError::config(format!(
                    "environment override {name} has no key"
                )));
            };
            self.set_from_string(&format!("{section}.{key}"), &value)?;
        }
        Ok(())
    }

    /// Set one value by dotted key, e.g. `correlator.default_timeout_ms`
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "correlator.default_timeout_ms" => {
                self.correlator.default_timeout_ms = parse_value(key, value)?;
            }
            "correlator.finalized_retention_ms" => {
                self.correlator.finalized_retention_ms = parse_value(key, value)?;
            }
            "correlator.sweep_interval_ms" => {
                self.correlator.sweep_interval_ms = parse_value(key, value)?;
            }
            "sessions.idle_timeout_ms" => {
                self.sessions.idle_timeout_ms = parse_value(key, value)?;
            }
            "ledger.max_page_size" => self.ledger.max_page_size = parse_value(key, value)?,
            "ledger.ttl_ms" => self.ledger.ttl_ms = parse_value(key, value)?,
            "ledger.cleanup_interval_ms" => {
                self.ledger.cleanup_interval_ms = parse_value(key, value)?;
            }
            "stats.enabled" => self.stats.enabled = parse_value(key, value)?,
            "stats.report_interval_ms" => {
                self.stats.report_interval_ms = parse_value(key, value)?;
            }
            _ => return Err(TetherError::config(format!("unknown key {key}"))),
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.correlator.default_timeout_ms == 0 {
            return Err(TetherError::config(
                "correlator.default_timeout_ms must be positive",
            ));
        }
        if self.correlator.sweep_interval_ms == 0 {
            return Err(TetherError::config(
                "correlator.sweep_interval_ms must be positive",
            ));
        }
        if self.ledger.max_page_size == 0 {
            return Err(TetherError::config("ledger.max_page_size must be positive"));
        }
        if self.ledger.ttl_ms > 0 && self.ledger.cleanup_interval_ms == 0 {
            return Err(TetherError::config(
                "ledger.cleanup_interval_ms must be positive when ledger.ttl_ms is set",
            ));
        }
        if self.stats.enabled && self.stats.report_interval_ms == 0 {
            return Err(TetherError::config(
                "stats.report_interval_ms must be positive when stats are enabled",
            ));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| TetherError::config(format!("invalid value {value:?} for {key}: {e}")))
}
