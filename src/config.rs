//! Configuration management for vpnctl

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::device::{Device, Keys};
use crate::error::{VpnctlError, VpnctlResult};
use crate::server::{Server, ServerLocation};

/// User-facing settings consulted by the controller at each decision point.
///
/// The controller never caches these; it reads a fresh snapshot from a
/// `watch` channel every time it needs one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Activate the tunnel as soon as the backend reports it is down at startup
    pub start_at_boot: bool,
    /// Resolve the captive-portal allow-list before every activation
    pub captive_portal_alert: bool,
    /// Route IPv6 through the tunnel
    pub ipv6_enabled: bool,
    /// Keep the local network reachable outside the tunnel
    pub local_network_access: bool,
}

/// Timer durations, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    /// Grace period after an unsolicited connect before settling to On
    #[serde(default = "default_activation_grace")]
    pub activation_grace_ms: u64,
    /// Grace period after an unsolicited disconnect before settling
    #[serde(default = "default_deactivation_grace")]
    pub deactivation_grace_ms: u64,
    /// Period of the elapsed-time refresh while On
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// How long a status query waits for the backend
    #[serde(default = "default_status_timeout")]
    pub status_timeout_ms: u64,
    /// Minimum duration of an activation as seen by the controller
    #[serde(default = "default_min_activation")]
    pub min_activation_ms: u64,
    /// Minimum duration of a deactivation as seen by the controller
    #[serde(default = "default_min_deactivation")]
    pub min_deactivation_ms: u64,
    /// Minimum duration of each half of a server switch
    #[serde(default = "default_min_switching")]
    pub min_switching_ms: u64,
}

/// Captive-portal allow-list and recovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptivePortalConfig {
    /// IPv4 addresses that must stay reachable outside the tunnel
    #[serde(default)]
    pub ipv4_addresses: Vec<String>,
    /// IPv6 addresses that must stay reachable outside the tunnel
    #[serde(default)]
    pub ipv6_addresses: Vec<String>,
    /// Delay before re-activating once a captive portal was detected
    #[serde(default = "default_captive_portal_delay")]
    pub activation_delay_ms: u64,
}

/// Main vpnctl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnctlConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub timers: TimerSettings,
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub keys: Keys,
    /// Currently selected location
    #[serde(default = "default_location")]
    pub location: ServerLocation,
    #[serde(default = "default_servers")]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub captive_portal: CaptivePortalConfig,
}

fn default_activation_grace() -> u64 {
    1000
}

fn default_deactivation_grace() -> u64 {
    1500
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_status_timeout() -> u64 {
    5000
}

fn default_min_activation() -> u64 {
    1000
}

fn default_min_deactivation() -> u64 {
    1500
}

fn default_min_switching() -> u64 {
    2000
}

fn default_captive_portal_delay() -> u64 {
    10_000
}

fn default_location() -> ServerLocation {
    ServerLocation::new("zz", "Loopback")
}

fn default_servers() -> Vec<Server> {
    vec![Server {
        hostname: "loopback-1".to_string(),
        country_code: "zz".to_string(),
        city: "Loopback".to_string(),
        ipv4_addr_in: "127.0.0.1".to_string(),
        ipv6_addr_in: "::1".to_string(),
        public_key: String::new(),
        port: 51820,
        weight: 1,
    }]
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            activation_grace_ms: default_activation_grace(),
            deactivation_grace_ms: default_deactivation_grace(),
            tick_interval_ms: default_tick_interval(),
            status_timeout_ms: default_status_timeout(),
            min_activation_ms: default_min_activation(),
            min_deactivation_ms: default_min_deactivation(),
            min_switching_ms: default_min_switching(),
        }
    }
}

impl TimerSettings {
    pub fn activation_grace(&self) -> Duration {
        Duration::from_millis(self.activation_grace_ms)
    }

    pub fn deactivation_grace(&self) -> Duration {
        Duration::from_millis(self.deactivation_grace_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn min_activation(&self) -> Duration {
        Duration::from_millis(self.min_activation_ms)
    }

    pub fn min_deactivation(&self) -> Duration {
        Duration::from_millis(self.min_deactivation_ms)
    }

    pub fn min_switching(&self) -> Duration {
        Duration::from_millis(self.min_switching_ms)
    }
}

impl Default for CaptivePortalConfig {
    fn default() -> Self {
        Self {
            ipv4_addresses: Vec::new(),
            ipv6_addresses: Vec::new(),
            activation_delay_ms: default_captive_portal_delay(),
        }
    }
}

impl CaptivePortalConfig {
    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }
}

impl Default for VpnctlConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            timers: TimerSettings::default(),
            device: Device::default(),
            keys: Keys::default(),
            location: default_location(),
            servers: default_servers(),
            captive_portal: CaptivePortalConfig::default(),
        }
    }
}

impl VpnctlConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> VpnctlResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VpnctlError::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> VpnctlResult<Self> {
        toml::from_str(content)
            .map_err(|e| VpnctlError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> VpnctlResult<()> {
        let content = self.to_toml()?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| VpnctlError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Serialize configuration to TOML text
    pub fn to_toml(&self) -> VpnctlResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VpnctlError::Config(format!("Failed to serialize config: {}", e)))
    }
}
