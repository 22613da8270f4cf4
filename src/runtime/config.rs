//! Engine configuration
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```toml
//! stop_timeout_ms = 500
//! bridges = ["thread", "process"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::bridge::{BRIDGE_KINDS, BridgeKind};
use super::errors::ConfigError;

/// Default bound on computer setup (thread or worker spawn)
pub const DEFAULT_SETUP_TIMEOUT_MS: u64 = 5000;

/// Default bound on a cooperative stop
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 2000;

/// Default bound on a forced close
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1000;

/// Default wait of an idle event loop before rechecking its gates
pub const DEFAULT_IDLE_POLL_MS: u64 = 50;

/// Default duration after which a node call is reported as blocked
pub const DEFAULT_WATCHDOG_THRESHOLD_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub setup_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub idle_poll_ms: u64,
    /// 0 disables the watchdog
    pub watchdog_threshold_ms: u64,
    /// Check emitted values against their port type and warn on mismatch
    pub check_values: bool,
    /// Bridge kinds available for resolution
    pub bridges: Vec<BridgeKind>,
    /// Program started for process computers; the current executable if unset
    pub worker_program: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            setup_timeout_ms: DEFAULT_SETUP_TIMEOUT_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            watchdog_threshold_ms: DEFAULT_WATCHDOG_THRESHOLD_MS,
            check_values: false,
            bridges: BRIDGE_KINDS.to_vec(),
            worker_program: None,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn watchdog_threshold(&self) -> Option<Duration> {
        (self.watchdog_threshold_ms > 0).then(|| Duration::from_millis(self.watchdog_threshold_ms))
    }
}
