//! Allowed-IP ranges handed to the backend on activation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::captive_portal::CaptivePortal;
use crate::config::Settings;

/// Address family of an allowed range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpFamily {
    IPv4,
    IPv6,
}

/// An address range the backend routes through the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowedIpRange {
    pub address: String,
    pub prefix_length: u8,
    pub family: IpFamily,
}

impl AllowedIpRange {
    pub fn new(address: impl Into<String>, prefix_length: u8, family: IpFamily) -> Self {
        Self {
            address: address.into(),
            prefix_length,
            family,
        }
    }

    pub fn ipv4(address: impl Into<String>, prefix_length: u8) -> Self {
        Self::new(address, prefix_length, IpFamily::IPv4)
    }

    pub fn ipv6(address: impl Into<String>, prefix_length: u8) -> Self {
        Self::new(address, prefix_length, IpFamily::IPv6)
    }
}

impl fmt::Display for AllowedIpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_length)
    }
}

/// Build the ordered allowed-IP list for an activation.
///
/// Captive-portal addresses are emitted with prefix length 0, which is the
/// convention the backends currently expect.
pub fn allowed_ip_ranges(captive_portal: &CaptivePortal, settings: &Settings) -> Vec<AllowedIpRange> {
    let ipv6_enabled = settings.ipv6_enabled;
    let mut list = vec![AllowedIpRange::ipv4("0.0.0.0", 0)];

    if ipv6_enabled {
        list.push(AllowedIpRange::ipv6("::", 0));
    }

    for address in &captive_portal.ipv4_addresses {
        list.push(AllowedIpRange::ipv4(address.as_str(), 0));
    }

    if ipv6_enabled {
        for address in &captive_portal.ipv6_addresses {
            list.push(AllowedIpRange::ipv6(address.as_str(), 0));
        }
    }

    if settings.local_network_access {
        list.push(AllowedIpRange::ipv4("128.0.0.1", 1));

        if ipv6_enabled {
            list.push(AllowedIpRange::ipv6("8000::", 1));
        }
    }

    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ipv6_enabled: bool, local_network_access: bool) -> Settings {
        Settings {
            ipv6_enabled,
            local_network_access,
            ..Default::default()
        }
    }

    fn portal(ipv4: &[&str], ipv6: &[&str]) -> CaptivePortal {
        CaptivePortal {
            ipv4_addresses: ipv4.iter().map(|s| s.to_string()).collect(),
            ipv6_addresses: ipv6.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_route_only() {
        let ranges = allowed_ip_ranges(&CaptivePortal::default(), &settings(false, false));
        assert_eq!(ranges, vec![AllowedIpRange::ipv4("0.0.0.0", 0)]);
    }

    #[test]
    fn test_ipv6_disabled_ignores_portal_ipv6() {
        let captive = portal(&[], &["2001:db8::1", "2001:db8::2", "2001:db8::3"]);
        let ranges = allowed_ip_ranges(&captive, &settings(false, true));
        assert_eq!(
            ranges,
            vec![
                AllowedIpRange::ipv4("0.0.0.0", 0),
                AllowedIpRange::ipv4("128.0.0.1", 1),
            ]
        );
    }

    #[test]
    fn test_full_ordering() {
        let captive = portal(&["198.51.100.7"], &["2001:db8::7"]);
        let ranges = allowed_ip_ranges(&captive, &settings(true, true));
        let rendered: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "0.0.0.0/0",
                "::/0",
                "198.51.100.7/0",
                "2001:db8::7/0",
                "128.0.0.1/1",
                "8000::/1",
            ]
        );
        assert_eq!(ranges[3].family, IpFamily::IPv6);
    }

    #[test]
    fn test_portal_ipv4_kept_without_ipv6() {
        let captive = portal(&["198.51.100.7", "198.51.100.8"], &["2001:db8::7"]);
        let ranges = allowed_ip_ranges(&captive, &settings(false, false));
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.family == IpFamily::IPv4));
    }
}
