//! Device identity and session collaborator
//!
//! The controller needs the current device and its key material at every
//! activation, and needs to end the account session on logout. Both come
//! from a [`Session`] implementation injected at construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Device registered with the VPN account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    /// Human readable device name
    pub name: String,
    /// Public key registered for this device
    pub public_key: String,
    /// Tunnel IPv4 address assigned to this device
    pub ipv4_address: String,
    /// Tunnel IPv6 address assigned to this device
    pub ipv6_address: String,
}

/// Key material for the current device
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keys {
    pub private_key: String,
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys").field("private_key", &"<redacted>").finish()
    }
}

/// Account session as seen by the controller
pub trait Session: Send {
    /// Device currently registered for this session
    fn current_device(&self) -> Device;

    /// Key material of the current device
    fn keys(&self) -> Keys;

    /// Terminate the account session
    fn logout(&mut self);
}

/// Session backed by fixed device and key values
pub struct StaticSession {
    device: Device,
    keys: Keys,
    logged_in: bool,
}

impl StaticSession {
    pub fn new(device: Device, keys: Keys) -> Self {
        Self {
            device,
            keys,
            logged_in: true,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }
}

impl Session for StaticSession {
    fn current_device(&self) -> Device {
        self.device.clone()
    }

    fn keys(&self) -> Keys {
        self.keys.clone()
    }

    fn logout(&mut self) {
        info!("Logging out device {}", self.device.name);
        self.logged_in = false;
    }
}
