//! Controller timers
//!
//! Two kinds of timers drive the controller:
//!
//! - the periodic tick that refreshes elapsed connected time while `On`.
//!   The controller only records whether it is armed; the service loop owns
//!   the actual interval and follows the arm epoch.
//! - self-healing grace timers, armed after the backend reports a
//!   transition the controller did not ask for. They are never cancelled:
//!   the delivered event carries the state that was current when the timer
//!   was armed and the controller ignores it if the state has moved on.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::state::ConnectionState;
use super::ControllerEvent;

/// Arm state of the periodic elapsed-time tick
#[derive(Debug, Default)]
pub struct PeriodicTick {
    armed: bool,
    epoch: u64,
}

impl PeriodicTick {
    pub fn start(&mut self) {
        self.armed = true;
        self.epoch += 1;
    }

    pub fn stop(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Incremented on every `start`, so a restart is visible even when the
    /// tick was already armed
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Post `GraceElapsed { expected }` after `delay`
pub fn schedule_grace(
    events: &mpsc::UnboundedSender<ControllerEvent>,
    delay: Duration,
    expected: ConnectionState,
) {
    let events = events.clone();
    debug!("Arming grace timer for {} ({:?})", expected, delay);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // The controller may have shut down meanwhile
        let _ = events.send(ControllerEvent::GraceElapsed { expected });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_epoch_advances_on_restart() {
        let mut tick = PeriodicTick::default();
        assert!(!tick.is_armed());

        tick.start();
        let first = tick.epoch();
        tick.start();
        assert!(tick.is_armed());
        assert!(tick.epoch() > first);

        tick.stop();
        assert!(!tick.is_armed());
        assert_eq!(tick.epoch(), first + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_event_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = tokio::time::Instant::now();

        schedule_grace(&tx, Duration::from_millis(1500), ConnectionState::Disconnecting);

        match rx.recv().await {
            Some(ControllerEvent::GraceElapsed { expected }) => {
                assert_eq!(expected, ConnectionState::Disconnecting)
            }
            _ => panic!("expected a grace event"),
        }
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }
}
