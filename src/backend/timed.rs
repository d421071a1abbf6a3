//! Minimum-duration decorator
//!
//! Wraps any backend and holds back its `Connected`/`Disconnected` reports
//! until a minimum time has passed since the matching request, so a very
//! fast platform still shows a visible transitional state. Every other
//! report is forwarded in order behind any held transition.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::{ActivationRequest, BackendNotifier, ControllerBackend, LogsCallback};
use crate::config::TimerSettings;
use crate::device::{Device, Keys};

/// Minimum transition durations applied by [`TimedBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumDurations {
    pub activation: Duration,
    pub deactivation: Duration,
    pub switching: Duration,
}

impl From<&TimerSettings> for MinimumDurations {
    fn from(timers: &TimerSettings) -> Self {
        Self {
            activation: timers.min_activation(),
            deactivation: timers.min_deactivation(),
            switching: timers.min_switching(),
        }
    }
}

/// Decorator enforcing [`MinimumDurations`] around an inner backend
pub struct TimedBackend<B> {
    inner: B,
    durations: MinimumDurations,
    hold_until: watch::Sender<Instant>,
}

impl<B: ControllerBackend> TimedBackend<B> {
    pub fn new(inner: B, durations: MinimumDurations) -> Self {
        let (hold_until, _) = watch::channel(Instant::now());
        Self {
            inner,
            durations,
            hold_until,
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn hold_for(&self, duration: Duration) {
        self.hold_until.send_replace(Instant::now() + duration);
    }
}

impl<B: ControllerBackend> ControllerBackend for TimedBackend<B> {
    fn initialize(&mut self, device: &Device, keys: &Keys, notifier: BackendNotifier) {
        let (inner_notifier, mut inner_rx) = BackendNotifier::channel();
        let hold_until = self.hold_until.subscribe();

        tokio::spawn(async move {
            while let Some(event) = inner_rx.recv().await {
                if event.is_transition() {
                    let until = *hold_until.borrow();
                    if until > Instant::now() {
                        debug!("Holding {:?} until minimum duration elapses", event);
                        tokio::time::sleep_until(until).await;
                    }
                }
                if !notifier.send(event) {
                    break;
                }
            }
        });

        self.inner.initialize(device, keys, inner_notifier);
    }

    fn activate(&mut self, request: ActivationRequest) {
        let duration = if request.is_switch {
            self.durations.switching
        } else {
            self.durations.activation
        };
        self.hold_for(duration);
        self.inner.activate(request);
    }

    fn deactivate(&mut self, is_switch: bool) {
        let duration = if is_switch {
            self.durations.switching
        } else {
            self.durations.deactivation
        };
        self.hold_for(duration);
        self.inner.deactivate(is_switch);
    }

    fn check_status(&mut self) {
        self.inner.check_status();
    }

    fn get_backend_logs(&mut self, callback: LogsCallback) {
        self.inner.get_backend_logs(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendEvent, DummyBackend};
    use crate::controller::TunnelStatus;

    fn durations() -> MinimumDurations {
        MinimumDurations {
            activation: Duration::from_millis(1000),
            deactivation: Duration::from_millis(1500),
            switching: Duration::from_millis(2000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivation_held_for_minimum() {
        let (notifier, mut rx) = BackendNotifier::channel();
        let mut backend = TimedBackend::new(DummyBackend::new(), durations());
        backend.initialize(&Device::default(), &Keys::default(), notifier);
        assert!(matches!(rx.recv().await, Some(BackendEvent::Initialized { .. })));

        let started = Instant::now();
        backend.deactivate(false);
        assert_eq!(rx.recv().await, Some(BackendEvent::Disconnected));
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_uses_switching_duration() {
        let (notifier, mut rx) = BackendNotifier::channel();
        let mut backend = TimedBackend::new(DummyBackend::new(), durations());
        backend.initialize(&Device::default(), &Keys::default(), notifier);
        rx.recv().await;

        let started = Instant::now();
        backend.deactivate(true);
        assert_eq!(rx.recv().await, Some(BackendEvent::Disconnected));
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_not_delayed_without_transition() {
        let (notifier, mut rx) = BackendNotifier::channel();
        let mut backend = TimedBackend::new(DummyBackend::new(), durations());
        backend.initialize(&Device::default(), &Keys::default(), notifier);
        rx.recv().await;

        let started = Instant::now();
        backend.check_status();
        match rx.recv().await {
            Some(BackendEvent::StatusUpdated(TunnelStatus { tx_bytes, .. })) => assert_eq!(tx_bytes, 0),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_millis(1000));
    }
}
