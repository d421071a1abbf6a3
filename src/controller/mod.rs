//! Connection-lifecycle controller
//!
//! The controller owns the state of the single logical tunnel and decides
//! when to bring it up, when to tear it down, and what to do once a teardown
//! completes. It never blocks: backend requests are fire-and-forget and the
//! results come back as [`BackendEvent`]s, while application requests,
//! captive-portal lookups and grace timers come back as [`ControllerEvent`]s.
//! Both streams are consumed by [`ControllerService`], one event at a time.
//!
//! Competing requests (quit, update, subscription, logout, device limit,
//! captive portal) are never dropped while a transition is in flight: they
//! are parked as the pending [`NextStep`] and serviced once the tunnel is
//! down.

pub mod service;
pub mod state;
pub mod status;
pub mod timer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::mem;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::backend::{ActivationRequest, BackendEvent, BackendNotifier, ControllerBackend, LogsCallback};
use crate::captive_portal::{CaptivePortal, CaptivePortalActivator, CaptivePortalLookup, Reactivator};
use crate::config::{Settings, TimerSettings};
use crate::device::Session;
use crate::error::VpnctlError;
use crate::ip_range::allowed_ip_ranges;
use crate::server::{Server, ServerCatalog, ServerLocation};

pub use service::{ControllerHandle, ControllerService};
pub use state::{ConnectionState, NextStep, SwitchTarget};
pub use status::{StatusCallback, StatusCoalescer, TunnelStatus};
pub use timer::PeriodicTick;

const SIGNAL_CAPACITY: usize = 64;

/// Announcements to observers. None of them carries more than a hint to
/// re-read controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerSignal {
    StateChanged(ConnectionState),
    TimeChanged,
    ReadyToQuit,
    ReadyToUpdate,
    ReadyToSubscribe,
    Error(VpnctlError),
}

/// Requests from the application layer
pub enum ControllerRequest {
    Activate,
    Deactivate,
    ChangeServer { country_code: String, city: String },
    Quit,
    UpdateRequired,
    SubscriptionNeeded,
    Logout,
    SetDeviceLimit(bool),
    CaptivePortalDetected,
    Status(StatusCallback),
    /// A status caller gave up waiting for the backend
    StatusExpired,
    BackendLogs(LogsCallback),
    Snapshot(oneshot::Sender<ControllerSnapshot>),
    Shutdown,
}

/// Non-backend inputs of the controller
pub enum ControllerEvent {
    Request(ControllerRequest),
    /// The captive-portal lookup started by `activate` finished
    CaptivePortalResolved(CaptivePortal),
    /// A self-healing grace period elapsed
    GraceElapsed { expected: ConnectionState },
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub state: ConnectionState,
    pub next_step: NextStep,
    /// Seconds since the tunnel reached `On`; only present while `On`
    pub connected_seconds: Option<i64>,
    pub location: ServerLocation,
    /// Only present while `Switching`
    pub switch_target: Option<SwitchTarget>,
}

/// External collaborators, injected at construction
pub struct Collaborators {
    pub settings: watch::Receiver<Settings>,
    pub session: Box<dyn Session>,
    pub servers: Box<dyn ServerCatalog>,
    pub captive_portal_lookup: Arc<dyn CaptivePortalLookup>,
    pub captive_portal_activator: Arc<dyn CaptivePortalActivator>,
}

/// Receiving ends consumed by the service loop
pub struct ControllerChannels {
    pub backend: mpsc::UnboundedReceiver<BackendEvent>,
    pub events: mpsc::UnboundedReceiver<ControllerEvent>,
}

/// Tunnel state machine
pub struct Controller {
    state: ConnectionState,
    next_step: NextStep,
    switch_target: Option<SwitchTarget>,
    connection_date: DateTime<Utc>,

    backend: Box<dyn ControllerBackend>,
    settings: watch::Receiver<Settings>,
    session: Box<dyn Session>,
    servers: Box<dyn ServerCatalog>,
    captive_portal_lookup: Arc<dyn CaptivePortalLookup>,
    captive_portal_activator: Arc<dyn CaptivePortalActivator>,

    timers: TimerSettings,
    status: StatusCoalescer,
    tick: PeriodicTick,
    signals: broadcast::Sender<ControllerSignal>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    backend_tx: mpsc::UnboundedSender<BackendEvent>,
}

impl Controller {
    pub fn new(
        backend: Box<dyn ControllerBackend>,
        collaborators: Collaborators,
        timers: TimerSettings,
    ) -> (Self, ControllerChannels) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);

        let controller = Self {
            state: ConnectionState::Initializing,
            next_step: NextStep::None,
            switch_target: None,
            connection_date: Utc::now(),
            backend,
            settings: collaborators.settings,
            session: collaborators.session,
            servers: collaborators.servers,
            captive_portal_lookup: collaborators.captive_portal_lookup,
            captive_portal_activator: collaborators.captive_portal_activator,
            timers,
            status: StatusCoalescer::new(),
            tick: PeriodicTick::default(),
            signals,
            events_tx,
            backend_tx,
        };

        let channels = ControllerChannels {
            backend: backend_rx,
            events,
        };

        (controller, channels)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn next_step(&self) -> NextStep {
        self.next_step
    }

    /// Switch target; only meaningful while `Switching`
    pub fn switch_target(&self) -> Option<&SwitchTarget> {
        if self.state == ConnectionState::Switching {
            self.switch_target.as_ref()
        } else {
            None
        }
    }

    pub fn connection_date(&self) -> DateTime<Utc> {
        self.connection_date
    }

    /// Seconds elapsed since the tunnel came up
    pub fn time(&self) -> i64 {
        (Utc::now() - self.connection_date).num_seconds()
    }

    pub fn timers(&self) -> &TimerSettings {
        &self.timers
    }

    pub fn is_ticking(&self) -> bool {
        self.tick.is_armed()
    }

    pub fn tick_epoch(&self) -> u64 {
        self.tick.epoch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerSignal> {
        self.signals.subscribe()
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(
            self.events_tx.clone(),
            self.signals.clone(),
            self.timers.status_timeout(),
        )
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state,
            next_step: self.next_step,
            connected_seconds: (self.state == ConnectionState::On).then(|| self.time()),
            location: self.servers.current(),
            switch_target: self.switch_target().cloned(),
        }
    }

    /// Ask the backend to initialize. Only valid from `Initializing`.
    pub fn initialize(&mut self) {
        info!("Initializing the controller");

        if self.state != ConnectionState::Initializing {
            debug!("Controller already initialized ({})", self.state);
            return;
        }

        let device = self.session.current_device();
        let keys = self.session.keys();
        let notifier = BackendNotifier::new(self.backend_tx.clone());
        self.backend.initialize(&device, &keys, notifier);
    }

    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Initialized {
                success,
                state,
                connection_date,
            } => self.on_initialized(success, state, connection_date),
            BackendEvent::Connected => self.on_connected(),
            BackendEvent::Disconnected => self.on_disconnected(),
            BackendEvent::StatusUpdated(status) => self.on_status_updated(status),
        }
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Request(request) => self.handle_request(request),
            ControllerEvent::CaptivePortalResolved(portal) => {
                info!(
                    "Captive portal lookup completed - ipv4: {:?} ipv6: {:?}",
                    portal.ipv4_addresses, portal.ipv6_addresses
                );
                self.complete_activation(portal);
            }
            ControllerEvent::GraceElapsed { expected } => self.on_grace_elapsed(expected),
        }
    }

    fn handle_request(&mut self, request: ControllerRequest) {
        match request {
            ControllerRequest::Activate => self.activate(),
            ControllerRequest::Deactivate => self.deactivate(),
            ControllerRequest::ChangeServer { country_code, city } => {
                self.change_server(&country_code, &city)
            }
            ControllerRequest::Quit => self.quit(),
            ControllerRequest::UpdateRequired => self.update_required(),
            ControllerRequest::SubscriptionNeeded => self.subscription_needed(),
            ControllerRequest::Logout => self.logout(),
            ControllerRequest::SetDeviceLimit(device_limit) => self.set_device_limit(device_limit),
            ControllerRequest::CaptivePortalDetected => self.captive_portal_detected(),
            ControllerRequest::Status(callback) => self.get_status(callback),
            ControllerRequest::StatusExpired => self.expire_status(),
            ControllerRequest::BackendLogs(callback) => self.get_backend_logs(callback),
            ControllerRequest::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControllerRequest::Shutdown => debug!("Shutdown is handled by the service loop"),
        }
    }

    fn on_initialized(&mut self, success: bool, state: ConnectionState, connection_date: DateTime<Utc>) {
        info!(
            "Controller activated with status: {} state: {} connectionDate: {}",
            success, state, connection_date
        );

        if self.state != ConnectionState::Initializing {
            error!("Backend initialized while in state {}", self.state);
        }
        debug_assert_eq!(self.state, ConnectionState::Initializing);

        if !success {
            error!("Backend service failed to initialize");
            self.emit(ControllerSignal::Error(VpnctlError::BackendService(
                "backend failed to initialize".to_string(),
            )));
        }

        if self.process_next_step() {
            return;
        }

        // Already connected at startup: adopt the tunnel without replaying activation
        if state == ConnectionState::On {
            self.connection_date = connection_date;
            self.confirm_connected();
            return;
        }

        self.set_state(state);

        if self.settings.borrow().start_at_boot {
            info!("Start on boot");
            self.activate();
        }
    }

    /// Bring the tunnel up. A no-op unless `Off`, `Switching` or `CaptivePortal`.
    pub fn activate(&mut self) {
        info!("Activation requested in state {}", self.state);

        if !matches!(
            self.state,
            ConnectionState::Off | ConnectionState::Switching | ConnectionState::CaptivePortal
        ) {
            info!("Already connected");
            return;
        }

        if self.state != ConnectionState::Switching {
            self.set_state(ConnectionState::Connecting);
        }

        self.tick.stop();
        self.connection_date = Utc::now();

        let captive_portal_alert = self.settings.borrow().captive_portal_alert;
        if !captive_portal_alert {
            self.complete_activation(CaptivePortal::default());
            return;
        }

        let lookup = self.captive_portal_lookup.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let portal = match lookup.lookup().await {
                Ok(portal) => portal,
                Err(e) => {
                    warn!("Captive portal lookup failed, activating without allow-list: {}", e);
                    CaptivePortal::default()
                }
            };
            let _ = events.send(ControllerEvent::CaptivePortalResolved(portal));
        });
    }

    fn complete_activation(&mut self, portal: CaptivePortal) {
        let settings = self.settings.borrow().clone();

        let servers = self.servers.servers();
        let Some(server) = Server::weight_chooser(&servers).cloned() else {
            let location = self.servers.current();
            error!("No server available for {}", location);
            self.emit(ControllerSignal::Error(VpnctlError::NoServerAvailable {
                country_code: location.country_code,
                city: location.city,
            }));
            if !self.process_next_step() {
                self.set_state(ConnectionState::Off);
            }
            return;
        };

        let request = ActivationRequest {
            server,
            device: self.session.current_device(),
            keys: self.session.keys(),
            allowed_ip_ranges: allowed_ip_ranges(&portal, &settings),
            is_switch: self.state == ConnectionState::Switching,
        };

        info!(
            "Activating {} with {} allowed ranges (switch: {})",
            request.server.hostname,
            request.allowed_ip_ranges.len(),
            request.is_switch
        );
        self.backend.activate(request);
    }

    /// Tear the tunnel down. A no-op unless `On` or `Switching`.
    pub fn deactivate(&mut self) {
        info!("Deactivation requested in state {}", self.state);

        if !matches!(self.state, ConnectionState::On | ConnectionState::Switching) {
            info!("Already disconnected");
            return;
        }

        if self.state == ConnectionState::On {
            self.set_state(ConnectionState::Disconnecting);
        }

        self.tick.stop();
        self.backend.deactivate(self.state == ConnectionState::Switching);
    }

    fn on_connected(&mut self) {
        info!("Connected from state {}", self.state);

        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Switching) {
            warn!("Unexpected connection in state {}, settling through Connecting", self.state);
            self.set_state(ConnectionState::Connecting);
            self.connection_date = Utc::now();
            timer::schedule_grace(
                &self.events_tx,
                self.timers.activation_grace(),
                ConnectionState::Connecting,
            );
            return;
        }

        self.confirm_connected();
    }

    fn confirm_connected(&mut self) {
        self.set_state(ConnectionState::On);
        self.emit(ControllerSignal::TimeChanged);

        if self.next_step != NextStep::None {
            info!("Next step {:?} pending, disconnecting", self.next_step);
            self.deactivate();
            return;
        }

        self.tick.start();
    }

    fn on_disconnected(&mut self) {
        info!("Disconnected from state {}", self.state);

        self.tick.stop();

        if !matches!(self.state, ConnectionState::Disconnecting | ConnectionState::Switching) {
            warn!("Unexpected disconnection in state {}, settling through Disconnecting", self.state);
            self.set_state(ConnectionState::Disconnecting);
            timer::schedule_grace(
                &self.events_tx,
                self.timers.deactivation_grace(),
                ConnectionState::Disconnecting,
            );
            return;
        }

        let next_step = self.next_step;

        if self.process_next_step() {
            return;
        }

        if next_step == NextStep::None && self.state == ConnectionState::Switching {
            match self.switch_target.clone() {
                Some(target) => self
                    .servers
                    .change_server(&target.destination.country_code, &target.destination.city),
                None => error!("Switching without a switch target"),
            }
            self.activate();
            return;
        }

        self.set_state(ConnectionState::Off);
    }

    fn on_grace_elapsed(&mut self, expected: ConnectionState) {
        if self.state != expected {
            debug!("Grace period for {} expired in state {}, ignoring", expected, self.state);
            return;
        }

        match expected {
            ConnectionState::Connecting => self.on_connected(),
            ConnectionState::Disconnecting => self.on_disconnected(),
            other => debug!("No grace handling for {}", other),
        }
    }

    /// Periodic elapsed-time refresh; only fires while `On`
    pub fn on_tick(&mut self) {
        if self.state != ConnectionState::On {
            error!("Tick fired in state {}", self.state);
        }
        debug_assert_eq!(self.state, ConnectionState::On);

        if self.state == ConnectionState::On {
            self.emit(ControllerSignal::TimeChanged);
        }
    }

    /// Select a different location, switching the live tunnel if it is up.
    ///
    /// Must only be called while `On` or `Off`.
    pub fn change_server(&mut self, country_code: &str, city: &str) {
        let valid = matches!(self.state, ConnectionState::On | ConnectionState::Off);
        if !valid {
            error!("Server change requested in state {}", self.state);
        }
        debug_assert!(valid, "change_server called in state {}", self.state);
        if !valid {
            return;
        }

        let current = self.servers.current();
        if current.matches(country_code, city) {
            info!("No server change needed");
            return;
        }

        if self.state == ConnectionState::Off {
            info!("Change server");
            self.servers.change_server(country_code, city);
            return;
        }

        self.tick.stop();

        info!("Switching to a different server");

        self.switch_target = Some(SwitchTarget {
            destination: ServerLocation::new(country_code, city),
            from_city: current.city,
        });

        self.set_state(ConnectionState::Switching);

        self.deactivate();
    }

    pub fn quit(&mut self) {
        info!("Quitting");

        if self.state.is_settled_down() {
            self.emit(ControllerSignal::ReadyToQuit);
            return;
        }

        self.defer(NextStep::Quit);
    }

    pub fn update_required(&mut self) {
        info!("Update required");

        if self.state == ConnectionState::Off {
            self.emit(ControllerSignal::ReadyToUpdate);
            return;
        }

        self.defer(NextStep::Update);
    }

    pub fn subscription_needed(&mut self) {
        info!("Subscription needed");

        if self.state == ConnectionState::Off {
            self.emit(ControllerSignal::ReadyToSubscribe);
            return;
        }

        self.defer(NextStep::Subscribe);
    }

    pub fn logout(&mut self) {
        info!("Logout");

        self.session.logout();

        if self.state == ConnectionState::Off {
            return;
        }

        self.defer(NextStep::Disconnect);
    }

    pub fn set_device_limit(&mut self, device_limit: bool) {
        info!("Device limit mode: {}", device_limit);

        if !device_limit {
            if self.state != ConnectionState::DeviceLimit {
                error!("Leaving device limit mode from state {}", self.state);
            }
            debug_assert_eq!(self.state, ConnectionState::DeviceLimit);
            self.set_state(ConnectionState::Off);
            return;
        }

        if self.state == ConnectionState::Off {
            self.set_state(ConnectionState::DeviceLimit);
            return;
        }

        self.defer(NextStep::DeviceLimit);
    }

    pub fn captive_portal_detected(&mut self) {
        info!("Captive portal detected in state {}", self.state);

        if self.state != ConnectionState::On {
            return;
        }

        self.set_next_step(NextStep::WaitForCaptivePortal);
        self.deactivate();
    }

    /// Report tunnel status to `callback`, coalescing concurrent requests
    /// into a single backend query.
    pub fn get_status(&mut self, callback: StatusCallback) {
        debug!("Check status");

        if self.state != ConnectionState::On {
            callback(TunnelStatus::default());
            return;
        }

        if self.status.enqueue(callback) {
            self.backend.check_status();
        }
    }

    fn on_status_updated(&mut self, status: TunnelStatus) {
        let served = self.status.resolve(&status);
        debug!("Status updated, served {} callers", served);
    }

    /// Release callers parked on a status request the backend never
    /// answered, so the next caller issues a fresh backend query.
    pub fn expire_status(&mut self) {
        if self.status.is_empty() {
            return;
        }
        let released = self.status.resolve(&TunnelStatus::default());
        warn!("No status reply from backend, released {} callers", released);
    }

    pub fn get_backend_logs(&mut self, callback: LogsCallback) {
        self.backend.get_backend_logs(callback);
    }

    /// Park `step` and start the teardown if the tunnel is up
    fn defer(&mut self, step: NextStep) {
        self.set_next_step(step);

        if self.state == ConnectionState::On {
            self.deactivate();
        }
    }

    fn set_next_step(&mut self, step: NextStep) {
        if self.next_step != NextStep::None && self.next_step != step {
            warn!("Pending next step {:?} replaced by {:?}", self.next_step, step);
        }
        self.next_step = step;
    }

    /// Take the pending next step and act on it. Returns true when the step
    /// settled the controller and the caller must not transition further.
    fn process_next_step(&mut self) -> bool {
        let next_step = mem::take(&mut self.next_step);

        match next_step {
            NextStep::Quit => {
                self.emit(ControllerSignal::ReadyToQuit);
                true
            }
            NextStep::Update => {
                self.emit(ControllerSignal::ReadyToUpdate);
                true
            }
            NextStep::Subscribe => {
                self.emit(ControllerSignal::ReadyToSubscribe);
                true
            }
            NextStep::DeviceLimit => {
                self.set_state(ConnectionState::DeviceLimit);
                true
            }
            NextStep::WaitForCaptivePortal => {
                let activator = self.captive_portal_activator.clone();
                let reactivator = Reactivator::new(self.events_tx.clone());
                tokio::spawn(async move { activator.run(reactivator).await });

                self.set_state(ConnectionState::CaptivePortal);
                true
            }
            NextStep::None | NextStep::Disconnect => false,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        info!("Setting state: {}", state);
        self.state = state;
        if state != ConnectionState::On {
            self.tick.stop();
        }
        self.emit(ControllerSignal::StateChanged(state));
    }

    fn emit(&self, signal: ControllerSignal) {
        // No subscribers is fine
        let _ = self.signals.send(signal);
    }
}
