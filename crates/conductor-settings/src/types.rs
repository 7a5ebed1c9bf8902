//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may be partial: missing fields keep their defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the conductor process.
///
/// ```json
/// {
///   "setupCfgPath": "configs/auditory_aphasia.toml",
///   "dispatch": { "transport": "http", "timeoutMs": 2000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConductorSettings {
    /// Path of the control-room setup document (modules and macros).
    pub setup_cfg_path: String,
    /// Command dispatch behavior.
    pub dispatch: DispatchSettings,
    /// Control server network settings.
    pub server: ServerSettings,
    /// Run bookkeeping.
    pub runs: RunSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self {
            setup_cfg_path: "configs/control_room.toml".to_string(),
            dispatch: DispatchSettings::default(),
            server: ServerSettings::default(),
            runs: RunSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ConductorSettings {
    /// Reject file values outside the ranges the environment overrides accept.
    pub fn validate(&self) -> Result<()> {
        if self.setup_cfg_path.trim().is_empty() {
            return Err(SettingsError::InvalidValue("setupCfgPath is empty".into()));
        }
        if !(1..=600_000).contains(&self.dispatch.timeout_ms) {
            return Err(SettingsError::InvalidValue(format!(
                "dispatch.timeoutMs {} not in 1..=600000",
                self.dispatch.timeout_ms
            )));
        }
        if self.dispatch.default_delay_ms > 60_000 {
            return Err(SettingsError::InvalidValue(format!(
                "dispatch.defaultDelayMs {} exceeds 60000",
                self.dispatch.default_delay_ms
            )));
        }
        if self.runs.history_limit > 100_000 {
            return Err(SettingsError::InvalidValue(format!(
                "runs.historyLimit {} exceeds 100000",
                self.runs.history_limit
            )));
        }
        Ok(())
    }
}

/// Transport used to reach module control endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One TCP connection per command, pipe-delimited request line.
    #[default]
    Tcp,
    /// JSON `POST /command` per command.
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    pub transport: TransportKind,
    /// Bound on one command round trip.
    pub timeout_ms: u64,
    /// Inter-command delay used when a macro declares no `delay_s`.
    pub default_delay_ms: u64,
    /// Serialize dispatches that target the same module across runs.
    pub serialize_per_module: bool,
}

impl DispatchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Tcp,
            timeout_ms: 5_000,
            default_delay_ms: 0,
            serialize_per_module: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSettings {
    /// Finished runs kept for status polling.
    pub history_limit: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { history_limit: 256 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-target overrides, e.g. `{"conductor_engine": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
