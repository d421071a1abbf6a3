//! Controller state types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::server::ServerLocation;

/// Connection state of the single logical tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Initializing,
    Off,
    Connecting,
    On,
    Disconnecting,
    Switching,
    DeviceLimit,
    CaptivePortal,
}

impl ConnectionState {
    /// States in which the tunnel is down and no transition is in flight
    pub fn is_settled_down(self) -> bool {
        matches!(
            self,
            ConnectionState::Initializing
                | ConnectionState::Off
                | ConnectionState::DeviceLimit
                | ConnectionState::CaptivePortal
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Off => "off",
            ConnectionState::Connecting => "connecting",
            ConnectionState::On => "on",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Switching => "switching",
            ConnectionState::DeviceLimit => "device-limit",
            ConnectionState::CaptivePortal => "captive-portal",
        };
        f.write_str(name)
    }
}

/// Action deferred until the tunnel has been torn down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextStep {
    #[default]
    None,
    Quit,
    Update,
    Subscribe,
    Disconnect,
    DeviceLimit,
    WaitForCaptivePortal,
}

/// Server the controller is switching to, and the city it is leaving
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTarget {
    pub destination: ServerLocation,
    pub from_city: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_down_states() {
        assert!(ConnectionState::Off.is_settled_down());
        assert!(ConnectionState::Initializing.is_settled_down());
        assert!(ConnectionState::DeviceLimit.is_settled_down());
        assert!(ConnectionState::CaptivePortal.is_settled_down());
        assert!(!ConnectionState::On.is_settled_down());
        assert!(!ConnectionState::Switching.is_settled_down());
    }

    #[test]
    fn test_next_step_default() {
        assert_eq!(NextStep::default(), NextStep::None);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::CaptivePortal.to_string(), "captive-portal");
        assert_eq!(ConnectionState::On.to_string(), "on");
    }
}
