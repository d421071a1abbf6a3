//! Backend contract
//!
//! A backend is the platform component that actually raises and lowers the
//! tunnel interface. The controller drives it through [`ControllerBackend`]
//! and never waits on it: every request returns immediately and the backend
//! reports completion later through the [`BackendNotifier`] it received in
//! `initialize`.
//!
//! ```text
//! ┌──────────────┐  activate/deactivate/check_status  ┌──────────────────┐
//! │  Controller  │ ─────────────────────────────────▶ │ ControllerBackend│
//! │              │ ◀───────────────────────────────── │  (timed ▸ dummy) │
//! └──────────────┘   BackendEvent via BackendNotifier └──────────────────┘
//! ```

pub mod dummy;
pub mod timed;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::controller::{ConnectionState, TunnelStatus};
use crate::device::{Device, Keys};
use crate::ip_range::AllowedIpRange;
use crate::server::Server;

pub use dummy::DummyBackend;
pub use timed::{MinimumDurations, TimedBackend};

/// Asynchronous reports from a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Initialization finished; carries the tunnel state found at startup
    Initialized {
        success: bool,
        state: ConnectionState,
        connection_date: DateTime<Utc>,
    },
    Connected,
    Disconnected,
    StatusUpdated(TunnelStatus),
}

impl BackendEvent {
    /// Whether this event reports a tunnel up/down transition
    pub fn is_transition(&self) -> bool {
        matches!(self, BackendEvent::Connected | BackendEvent::Disconnected)
    }
}

/// Sending half a backend uses to report back to the controller
#[derive(Debug, Clone)]
pub struct BackendNotifier {
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl BackendNotifier {
    pub fn new(tx: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self { tx }
    }

    /// Create a notifier together with the receiver it feeds
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Deliver an event. Returns false once the receiving side is gone.
    pub fn send(&self, event: BackendEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping backend event, controller gone: {:?}", e.0);
                false
            }
        }
    }

    pub fn initialized(&self, success: bool, state: ConnectionState, connection_date: DateTime<Utc>) {
        self.send(BackendEvent::Initialized {
            success,
            state,
            connection_date,
        });
    }

    pub fn connected(&self) {
        self.send(BackendEvent::Connected);
    }

    pub fn disconnected(&self) {
        self.send(BackendEvent::Disconnected);
    }

    pub fn status_updated(&self, status: TunnelStatus) {
        self.send(BackendEvent::StatusUpdated(status));
    }
}

/// Everything a backend needs to raise the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    pub server: Server,
    pub device: Device,
    pub keys: Keys,
    pub allowed_ip_ranges: Vec<AllowedIpRange>,
    /// True when this activation completes a server switch
    pub is_switch: bool,
}

/// Continuation receiving the backend log text
pub type LogsCallback = Box<dyn FnOnce(String) + Send>;

/// Capability interface implemented once per platform
///
/// Implementations must not block. Completion of `initialize`, `activate`,
/// `deactivate` and `check_status` is reported through the notifier;
/// `get_backend_logs` invokes its callback exactly once.
#[cfg_attr(test, mockall::automock)]
pub trait ControllerBackend: Send {
    fn initialize(&mut self, device: &Device, keys: &Keys, notifier: BackendNotifier);

    fn activate(&mut self, request: ActivationRequest);

    fn deactivate(&mut self, is_switch: bool);

    fn check_status(&mut self);

    fn get_backend_logs(&mut self, callback: LogsCallback);
}

impl<B: ControllerBackend + ?Sized> ControllerBackend for Box<B> {
    fn initialize(&mut self, device: &Device, keys: &Keys, notifier: BackendNotifier) {
        (**self).initialize(device, keys, notifier)
    }

    fn activate(&mut self, request: ActivationRequest) {
        (**self).activate(request)
    }

    fn deactivate(&mut self, is_switch: bool) {
        (**self).deactivate(is_switch)
    }

    fn check_status(&mut self) {
        (**self).check_status()
    }

    fn get_backend_logs(&mut self, callback: LogsCallback) {
        (**self).get_backend_logs(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier_delivers_in_order() {
        let (notifier, mut rx) = BackendNotifier::channel();
        notifier.connected();
        notifier.status_updated(TunnelStatus::default());
        notifier.disconnected();

        assert_eq!(rx.recv().await, Some(BackendEvent::Connected));
        assert_eq!(rx.recv().await, Some(BackendEvent::StatusUpdated(TunnelStatus::default())));
        assert_eq!(rx.recv().await, Some(BackendEvent::Disconnected));
    }

    #[test]
    fn test_notifier_after_receiver_dropped() {
        let (notifier, rx) = BackendNotifier::channel();
        drop(rx);
        assert!(!notifier.send(BackendEvent::Connected));
    }

    #[test]
    fn test_transition_events() {
        assert!(BackendEvent::Connected.is_transition());
        assert!(BackendEvent::Disconnected.is_transition());
        assert!(!BackendEvent::StatusUpdated(TunnelStatus::default()).is_transition());
    }
}
