//! Error types for vpnctl

use thiserror::Error;

/// Errors surfaced by the controller and its collaborators.
///
/// Every variant carries owned strings so the error can be cloned onto the
/// observer broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VpnctlError {
    /// The platform backend failed to initialize
    #[error("Backend service error: {0}")]
    BackendService(String),

    /// No server is available for the selected location
    #[error("No server available for {country_code}/{city}")]
    NoServerAvailable { country_code: String, city: String },

    /// Captive portal lookup failed
    #[error("Captive portal error: {0}")]
    CaptivePortal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The controller event loop is no longer running
    #[error("Controller stopped")]
    ControllerStopped,

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for VpnctlError {
    fn from(error: std::io::Error) -> Self {
        VpnctlError::Io(error.to_string())
    }
}

pub type VpnctlResult<T> = Result<T, VpnctlError>;
