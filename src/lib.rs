//! vpnctl - VPN connection-lifecycle controller
//!
//! Decides, for a single logical tunnel, when to bring it up, when to tear
//! it down, and how to sequence competing requests while the platform
//! backend runs underneath:
//! - Controller state machine and deferred next steps
//! - Status request coalescing
//! - Captive-portal allow-list and recovery
//! - Self-healing grace timers for unsolicited backend transitions
//! - Backend contract with a simulated backend and a timing decorator
//!
//! # Usage
//!
//! ```rust,no_run
//! use libvpnctl::backend::DummyBackend;
//! use libvpnctl::controller::{Controller, ControllerService};
//! # async fn run(collaborators: libvpnctl::controller::Collaborators) {
//! let (controller, channels) = Controller::new(
//!     Box::new(DummyBackend::new()),
//!     collaborators,
//!     Default::default(),
//! );
//! let service = ControllerService::new(controller, channels);
//! let handle = service.handle();
//! service.spawn();
//!
//! handle.activate().unwrap();
//! # }
//! ```

pub mod error;
pub mod config;
pub mod device;
pub mod server;
pub mod ip_range;
pub mod captive_portal;
pub mod backend;
pub mod controller;
pub mod log_buffer;

// Re-export commonly used types
pub use error::{VpnctlError, VpnctlResult};
pub use config::{Settings, TimerSettings, VpnctlConfig};
pub use device::{Device, Keys, Session, StaticSession};
pub use server::{InMemoryServerCatalog, Server, ServerCatalog, ServerLocation};
pub use ip_range::{allowed_ip_ranges, AllowedIpRange, IpFamily};
pub use captive_portal::{
    CaptivePortal, CaptivePortalActivator, CaptivePortalLookup, DelayedActivator,
    StaticCaptivePortalLookup,
};
pub use backend::{
    ActivationRequest, BackendEvent, BackendNotifier, ControllerBackend, DummyBackend, TimedBackend,
};
pub use controller::{
    Collaborators, ConnectionState, Controller, ControllerHandle, ControllerService,
    ControllerSignal, ControllerSnapshot, NextStep, SwitchTarget, TunnelStatus,
};
pub use log_buffer::LogBuffer;
