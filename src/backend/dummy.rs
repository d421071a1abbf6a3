//! Simulated backend for hosts without a platform integration
//!
//! Accepts every request, reports it as done after an optional latency,
//! and counts made-up traffic while the tunnel is "up".

use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use super::{ActivationRequest, BackendEvent, BackendNotifier, ControllerBackend, LogsCallback};
use crate::controller::{ConnectionState, TunnelStatus};
use crate::device::{Device, Keys};

const DUMMY_GATEWAY: &str = "10.64.0.1";
const BYTES_PER_CHECK: u64 = 1024;

/// Backend that only pretends to move packets
pub struct DummyBackend {
    notifier: Option<BackendNotifier>,
    latency: Duration,
    connected: bool,
    tx_bytes: u64,
    rx_bytes: u64,
    log: Vec<String>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            notifier: None,
            latency: Duration::ZERO,
            connected: false,
            tx_bytes: 0,
            rx_bytes: 0,
            log: Vec::new(),
        }
    }

    /// Delay every report by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn record(&mut self, line: String) {
        info!("{}", line);
        self.log.push(line);
    }

    fn report(&self, event: BackendEvent) {
        let Some(notifier) = self.notifier.clone() else {
            warn!("Dummy backend used before initialize, dropping {:?}", event);
            return;
        };

        if self.latency.is_zero() {
            notifier.send(event);
            return;
        }

        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            notifier.send(event);
        });
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerBackend for DummyBackend {
    fn initialize(&mut self, device: &Device, _keys: &Keys, notifier: BackendNotifier) {
        self.record(format!("dummy: initialize for device '{}'", device.name));
        self.notifier = Some(notifier);
        self.report(BackendEvent::Initialized {
            success: true,
            state: ConnectionState::Off,
            connection_date: Utc::now(),
        });
    }

    fn activate(&mut self, request: ActivationRequest) {
        let ranges: Vec<String> = request
            .allowed_ip_ranges
            .iter()
            .map(|r| r.to_string())
            .collect();
        self.record(format!(
            "dummy: activate {} ({}:{}) switch={} allowed=[{}]",
            request.server.hostname,
            request.server.ipv4_addr_in,
            request.server.port,
            request.is_switch,
            ranges.join(", ")
        ));
        self.connected = true;
        self.report(BackendEvent::Connected);
    }

    fn deactivate(&mut self, is_switch: bool) {
        self.record(format!("dummy: deactivate switch={}", is_switch));
        self.connected = false;
        self.report(BackendEvent::Disconnected);
    }

    fn check_status(&mut self) {
        if self.connected {
            self.tx_bytes += BYTES_PER_CHECK;
            self.rx_bytes += BYTES_PER_CHECK * 2;
        }
        self.report(BackendEvent::StatusUpdated(TunnelStatus {
            server_ipv4_gateway: DUMMY_GATEWAY.to_string(),
            tx_bytes: self.tx_bytes,
            rx_bytes: self.rx_bytes,
        }));
    }

    fn get_backend_logs(&mut self, callback: LogsCallback) {
        callback(self.log.join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;

    fn request() -> ActivationRequest {
        ActivationRequest {
            server: Server {
                hostname: "dummy-1".to_string(),
                country_code: "zz".to_string(),
                city: "Loopback".to_string(),
                ipv4_addr_in: "127.0.0.1".to_string(),
                ipv6_addr_in: String::new(),
                public_key: String::new(),
                port: 51820,
                weight: 1,
            },
            device: Device::default(),
            keys: Keys::default(),
            allowed_ip_ranges: Vec::new(),
            is_switch: false,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_reports() {
        let (notifier, mut rx) = BackendNotifier::channel();
        let mut backend = DummyBackend::new();

        backend.initialize(&Device::default(), &Keys::default(), notifier);
        assert!(matches!(
            rx.recv().await,
            Some(BackendEvent::Initialized { success: true, state: ConnectionState::Off, .. })
        ));

        backend.activate(request());
        assert_eq!(rx.recv().await, Some(BackendEvent::Connected));
        assert!(backend.is_connected());

        backend.check_status();
        match rx.recv().await {
            Some(BackendEvent::StatusUpdated(status)) => {
                assert_eq!(status.server_ipv4_gateway, DUMMY_GATEWAY);
                assert_eq!(status.tx_bytes, BYTES_PER_CHECK);
            }
            other => panic!("unexpected event {:?}", other),
        }

        backend.deactivate(false);
        assert_eq!(rx.recv().await, Some(BackendEvent::Disconnected));
        assert!(!backend.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_reports() {
        let (notifier, mut rx) = BackendNotifier::channel();
        let mut backend = DummyBackend::new().with_latency(Duration::from_millis(300));
        backend.initialize(&Device::default(), &Keys::default(), notifier);
        rx.recv().await;

        let started = tokio::time::Instant::now();
        backend.activate(request());
        assert_eq!(rx.recv().await, Some(BackendEvent::Connected));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_logs_callback_invoked_once() {
        let mut backend = DummyBackend::new();
        backend.deactivate(false);

        let (tx, rx) = std::sync::mpsc::channel();
        backend.get_backend_logs(Box::new(move |text| tx.send(text).unwrap()));
        let text = rx.recv().unwrap();
        assert!(text.contains("deactivate"));
        assert!(rx.try_recv().is_err());
    }
}
