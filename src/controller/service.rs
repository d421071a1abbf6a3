//! Controller event loop and application-facing handle
//!
//! [`ControllerService`] owns the [`Controller`] and feeds it backend
//! reports, application requests and timer expiries one at a time, so the
//! controller never sees concurrent mutation. [`ControllerHandle`] is the
//! cloneable front door the application layer talks to.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{
    Controller, ControllerChannels, ControllerEvent, ControllerRequest, ControllerSignal,
    ControllerSnapshot, TunnelStatus,
};
use crate::backend::BackendEvent;
use crate::error::{VpnctlError, VpnctlResult};

/// Single-task event loop driving a [`Controller`]
pub struct ControllerService {
    controller: Controller,
    backend_rx: mpsc::UnboundedReceiver<BackendEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    tick: Option<Interval>,
    tick_epoch: u64,
}

impl ControllerService {
    pub fn new(controller: Controller, channels: ControllerChannels) -> Self {
        Self {
            controller,
            backend_rx: channels.backend,
            events_rx: channels.events,
            tick: None,
            tick_epoch: 0,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.controller.handle()
    }

    /// Run the loop on a new task
    pub fn spawn(self) -> JoinHandle<Controller> {
        tokio::spawn(self.run())
    }

    /// Initialize the controller and process events until shutdown.
    /// Returns the controller so its final state can be inspected.
    pub async fn run(mut self) -> Controller {
        info!("Starting controller service");
        self.controller.initialize();
        self.sync_tick();

        loop {
            tokio::select! {
                Some(event) = self.backend_rx.recv() => {
                    debug!("Backend event: {:?}", event);
                    self.controller.handle_backend_event(event);
                }
                Some(event) = self.events_rx.recv() => {
                    if let ControllerEvent::Request(ControllerRequest::Shutdown) = event {
                        info!("Controller service shutting down in state {}", self.controller.state());
                        break;
                    }
                    self.controller.handle_event(event);
                }
                _ = next_tick(&mut self.tick), if self.controller.is_ticking() => {
                    self.controller.on_tick();
                }
                else => break,
            }

            self.sync_tick();
        }

        self.controller
    }

    /// Follow the controller's tick arm state. Runs after every handler, so
    /// a disarmed tick is dropped before the loop can poll it again.
    fn sync_tick(&mut self) {
        if !self.controller.is_ticking() {
            self.tick = None;
            return;
        }

        let epoch = self.controller.tick_epoch();
        if self.tick.is_none() || epoch != self.tick_epoch {
            let period = self.controller.timers().tick_interval();
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.tick = Some(interval);
            self.tick_epoch = epoch;
        }
    }
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Cloneable handle to a running [`ControllerService`]
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    signals: broadcast::Sender<ControllerSignal>,
    status_timeout: Duration,
}

impl ControllerHandle {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<ControllerEvent>,
        signals: broadcast::Sender<ControllerSignal>,
        status_timeout: Duration,
    ) -> Self {
        Self {
            events,
            signals,
            status_timeout,
        }
    }

    fn request(&self, request: ControllerRequest) -> VpnctlResult<()> {
        self.events
            .send(ControllerEvent::Request(request))
            .map_err(|_| VpnctlError::ControllerStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerSignal> {
        self.signals.subscribe()
    }

    pub fn activate(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::Activate)
    }

    pub fn deactivate(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::Deactivate)
    }

    pub fn change_server(&self, country_code: &str, city: &str) -> VpnctlResult<()> {
        self.request(ControllerRequest::ChangeServer {
            country_code: country_code.to_string(),
            city: city.to_string(),
        })
    }

    pub fn quit(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::Quit)
    }

    pub fn update_required(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::UpdateRequired)
    }

    pub fn subscription_needed(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::SubscriptionNeeded)
    }

    pub fn logout(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::Logout)
    }

    pub fn set_device_limit(&self, device_limit: bool) -> VpnctlResult<()> {
        self.request(ControllerRequest::SetDeviceLimit(device_limit))
    }

    pub fn captive_portal_detected(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::CaptivePortalDetected)
    }

    /// Stop the service loop
    pub fn shutdown(&self) -> VpnctlResult<()> {
        self.request(ControllerRequest::Shutdown)
    }

    /// Current tunnel status. Concurrent callers share one backend query.
    pub async fn status(&self) -> VpnctlResult<TunnelStatus> {
        let (tx, rx) = oneshot::channel();
        self.request(ControllerRequest::Status(Box::new(move |status| {
            let _ = tx.send(status);
        })))?;

        match tokio::time::timeout(self.status_timeout, rx).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(VpnctlError::ControllerStopped),
            Err(_) => {
                // The parked callback must not block later requests
                let _ = self.request(ControllerRequest::StatusExpired);
                Err(VpnctlError::Timeout(format!(
                    "no status from backend within {:?}",
                    self.status_timeout
                )))
            }
        }
    }

    pub async fn backend_logs(&self) -> VpnctlResult<String> {
        let (tx, rx) = oneshot::channel();
        self.request(ControllerRequest::BackendLogs(Box::new(move |logs| {
            let _ = tx.send(logs);
        })))?;

        rx.await.map_err(|_| VpnctlError::ControllerStopped)
    }

    pub async fn snapshot(&self) -> VpnctlResult<ControllerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.request(ControllerRequest::Snapshot(tx))?;
        rx.await.map_err(|_| VpnctlError::ControllerStopped)
    }
}
