//! Captive portal gate
//!
//! Before an activation the controller may resolve a captive-portal
//! allow-list: addresses that must stay reachable outside the tunnel so a
//! sign-in page keeps working. When a captive portal is detected while the
//! tunnel is up, the controller tears the tunnel down and hands control to a
//! [`CaptivePortalActivator`] that brings it back once the network is usable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::CaptivePortalConfig;
use crate::controller::{ControllerEvent, ControllerRequest};
use crate::error::{VpnctlError, VpnctlResult};

/// Captive-portal allow-list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptivePortal {
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
}

impl CaptivePortal {
    pub fn is_empty(&self) -> bool {
        self.ipv4_addresses.is_empty() && self.ipv6_addresses.is_empty()
    }
}

/// Resolves the captive-portal allow-list
#[async_trait]
pub trait CaptivePortalLookup: Send + Sync {
    async fn lookup(&self) -> VpnctlResult<CaptivePortal>;
}

/// Lookup returning a configured allow-list
pub struct StaticCaptivePortalLookup {
    portal: CaptivePortal,
}

impl StaticCaptivePortalLookup {
    pub fn new(portal: CaptivePortal) -> Self {
        Self { portal }
    }

    pub fn from_config(config: &CaptivePortalConfig) -> Self {
        Self::new(CaptivePortal {
            ipv4_addresses: config.ipv4_addresses.clone(),
            ipv6_addresses: config.ipv6_addresses.clone(),
        })
    }
}

#[async_trait]
impl CaptivePortalLookup for StaticCaptivePortalLookup {
    async fn lookup(&self) -> VpnctlResult<CaptivePortal> {
        debug!(
            "Captive portal allow-list: {} ipv4, {} ipv6",
            self.portal.ipv4_addresses.len(),
            self.portal.ipv6_addresses.len()
        );
        Ok(self.portal.clone())
    }
}

/// Lets a recovery flow ask the controller to activate again
#[derive(Clone)]
pub struct Reactivator {
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl Reactivator {
    pub(crate) fn new(events: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { events }
    }

    /// Request an activation
    pub fn activate(&self) -> VpnctlResult<()> {
        self.events
            .send(ControllerEvent::Request(ControllerRequest::Activate))
            .map_err(|_| VpnctlError::ControllerStopped)
    }
}

/// Recovery flow started when the controller enters `CaptivePortal`
#[async_trait]
pub trait CaptivePortalActivator: Send + Sync {
    async fn run(&self, reactivator: Reactivator);
}

/// Activator that re-activates the tunnel after a fixed delay
pub struct DelayedActivator {
    delay: Duration,
}

impl DelayedActivator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl CaptivePortalActivator for DelayedActivator {
    async fn run(&self, reactivator: Reactivator) {
        info!("Waiting {:?} for the captive portal to clear", self.delay);
        tokio::time::sleep(self.delay).await;

        if reactivator.activate().is_err() {
            debug!("Controller gone before captive portal recovery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup_from_config() {
        let config = CaptivePortalConfig {
            ipv4_addresses: vec!["203.0.113.9".to_string()],
            ipv6_addresses: Vec::new(),
            activation_delay_ms: 0,
        };
        let lookup = StaticCaptivePortalLookup::from_config(&config);
        let portal = lookup.lookup().await.unwrap();
        assert_eq!(portal.ipv4_addresses, vec!["203.0.113.9".to_string()]);
        assert!(!portal.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_activator_requests_activation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let activator = DelayedActivator::new(Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        activator.run(Reactivator::new(tx)).await;

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(matches!(
            rx.recv().await,
            Some(ControllerEvent::Request(ControllerRequest::Activate))
        ));
    }

    #[test]
    fn test_reactivator_reports_stopped_controller() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reactivator = Reactivator::new(tx);
        assert_eq!(reactivator.activate(), Err(VpnctlError::ControllerStopped));
    }
}
