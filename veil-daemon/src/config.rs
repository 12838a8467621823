//! Configuration types for the daemon
//!
//! The configuration file uses TOML format. The `[daemon]` section holds
//! process-level knobs; everything under `[settings]` is the runtime-mutable
//! state (relay constraints, obfuscation, lockdown mode) that clients can
//! change while the daemon runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use veil_types::constraints::RelaySettings;
use veil_types::obfuscation::{ObfuscationSettings, SelectedObfuscation};

use crate::error::{Error, Result};

const DEFAULT_RELAY_LIST_UPDATE_INTERVAL_SECS: u64 = 3600;
const MIN_RELAY_LIST_UPDATE_INTERVAL_SECS: u64 = 60;

/// Main configuration structure
///
/// # Example Configuration
///
/// ```toml
/// [daemon]
/// log_level = "info"
/// relay_list_update_interval = 3600
///
/// [settings]
/// lockdown_mode = false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Process-level settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Runtime-mutable tunnel settings
    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.daemon.validate()?;
        self.settings.validate()?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# Veil daemon configuration

[daemon]
# Log level: "error", "warn", "info", "debug", "trace"
log_level = "info"

# How often to refresh the relay list, in seconds (minimum 60)
relay_list_update_interval = 3600

[settings]
# Block all non-tunnel traffic, even while disconnected
lockdown_mode = false

# Obfuscation: "auto", "off", "udp2tcp", "shadowsocks", "quic", "lwo",
# or "wireguard_port"
[settings.obfuscation_settings]
selected_obfuscation = "auto"

# Relay constraints. Omit a key to leave it unconstrained.
# [settings.relay_settings.normal]
# location = { location = { city = ["se", "got"] } }
# ownership = "owned"
# providers = { only = ["provider-a"] }
"#
        .to_owned()
    }
}

/// Process-level daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log filter level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between relay list refreshes
    #[serde(default = "default_relay_list_update_interval")]
    pub relay_list_update_interval: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            relay_list_update_interval: default_relay_list_update_interval(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        match self.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(Error::Config(format!("unknown log level \"{other}\"")));
            }
        }

        if self.relay_list_update_interval < MIN_RELAY_LIST_UPDATE_INTERVAL_SECS {
            return Err(Error::Config(format!(
                "relay_list_update_interval {} is too small (minimum {})",
                self.relay_list_update_interval, MIN_RELAY_LIST_UPDATE_INTERVAL_SECS
            )));
        }

        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_relay_list_update_interval() -> u64 {
    DEFAULT_RELAY_LIST_UPDATE_INTERVAL_SECS
}

/// Runtime-mutable tunnel settings.
///
/// Changing these through the daemon handle broadcasts a settings event and
/// reconnects the tunnel if one is active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Relay constraints or a custom endpoint
    #[serde(default)]
    pub relay_settings: RelaySettings,

    /// Obfuscation mode and per-protocol settings
    #[serde(default)]
    pub obfuscation_settings: ObfuscationSettings,

    /// Block all non-tunnel traffic, even while disconnected
    #[serde(default)]
    pub lockdown_mode: bool,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if let RelaySettings::Custom(endpoint) = &self.relay_settings {
            if endpoint.host.is_empty() {
                return Err(Error::Config("custom endpoint host is empty".into()));
            }
            if endpoint.port == 0 {
                return Err(Error::Config("custom endpoint port must be non-zero".into()));
            }
        }

        // Port-override mode needs a port to override with
        if self.obfuscation_settings.selected_obfuscation == SelectedObfuscation::WireguardPort
            && self.obfuscation_settings.wireguard_port.port.is_any()
        {
            return Err(Error::Config(
                "wireguard_port obfuscation requires a port".into(),
            ));
        }

        Ok(())
    }
}
