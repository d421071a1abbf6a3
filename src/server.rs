//! Server list collaborator and weighted server selection

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// A country/city pair identifying a group of servers
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerLocation {
    pub country_code: String,
    pub city: String,
}

impl ServerLocation {
    pub fn new(country_code: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            city: city.into(),
        }
    }

    pub fn matches(&self, country_code: &str, city: &str) -> bool {
        self.country_code == country_code && self.city == city
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.country_code, self.city)
    }
}

/// A single VPN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub hostname: String,
    pub country_code: String,
    pub city: String,
    /// Entry IPv4 address
    pub ipv4_addr_in: String,
    /// Entry IPv6 address
    #[serde(default)]
    pub ipv6_addr_in: String,
    /// Server public key
    #[serde(default)]
    pub public_key: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Relative selection weight
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_port() -> u16 {
    51820
}

fn default_weight() -> u32 {
    1
}

impl Server {
    pub fn location(&self) -> ServerLocation {
        ServerLocation::new(&self.country_code, &self.city)
    }

    /// Pick a server with probability proportional to its weight
    pub fn weight_chooser(servers: &[Server]) -> Option<&Server> {
        Self::weight_chooser_with(servers, &mut rand::thread_rng())
    }

    /// Weighted pick using the given random source
    pub fn weight_chooser_with<'a, R: Rng + ?Sized>(
        servers: &'a [Server],
        rng: &mut R,
    ) -> Option<&'a Server> {
        let total: u64 = servers.iter().map(|s| u64::from(s.weight)).sum();
        if total == 0 {
            return servers.first();
        }

        let mut remaining = rng.gen_range(0..total);
        for server in servers {
            let weight = u64::from(server.weight);
            if remaining < weight {
                return Some(server);
            }
            remaining -= weight;
        }

        servers.last()
    }
}

/// Server list and current selection, owned outside the controller
pub trait ServerCatalog: Send {
    /// Currently selected location
    fn current(&self) -> ServerLocation;

    /// Servers available for the currently selected location
    fn servers(&self) -> Vec<Server>;

    /// Change the selected location
    fn change_server(&mut self, country_code: &str, city: &str);
}

/// Server catalog held in memory
pub struct InMemoryServerCatalog {
    servers: Vec<Server>,
    current: ServerLocation,
}

impl InMemoryServerCatalog {
    pub fn new(servers: Vec<Server>, current: ServerLocation) -> Self {
        Self { servers, current }
    }

    /// All known locations, in first-seen order
    pub fn locations(&self) -> Vec<ServerLocation> {
        let mut locations: Vec<ServerLocation> = Vec::new();
        for server in &self.servers {
            let location = server.location();
            if !locations.contains(&location) {
                locations.push(location);
            }
        }
        locations
    }
}

impl ServerCatalog for InMemoryServerCatalog {
    fn current(&self) -> ServerLocation {
        self.current.clone()
    }

    fn servers(&self) -> Vec<Server> {
        let servers: Vec<Server> = self
            .servers
            .iter()
            .filter(|s| self.current.matches(&s.country_code, &s.city))
            .cloned()
            .collect();
        debug!("{} servers for {}", servers.len(), self.current);
        servers
    }

    fn change_server(&mut self, country_code: &str, city: &str) {
        info!("Server selection changed: {} -> {}/{}", self.current, country_code, city);
        self.current = ServerLocation::new(country_code, city);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn server(hostname: &str, country_code: &str, city: &str, weight: u32) -> Server {
        Server {
            hostname: hostname.to_string(),
            country_code: country_code.to_string(),
            city: city.to_string(),
            ipv4_addr_in: "192.0.2.1".to_string(),
            ipv6_addr_in: String::new(),
            public_key: String::new(),
            port: 51820,
            weight,
        }
    }

    #[test]
    fn test_weight_chooser_empty() {
        assert!(Server::weight_chooser(&[]).is_none());
    }

    #[test]
    fn test_weight_chooser_skips_zero_weight() {
        let servers = vec![server("a", "se", "Malmo", 0), server("b", "se", "Malmo", 5)];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let chosen = Server::weight_chooser_with(&servers, &mut rng).unwrap();
            assert_eq!(chosen.hostname, "b");
        }
    }

    #[test]
    fn test_weight_chooser_all_zero_falls_back_to_first() {
        let servers = vec![server("a", "se", "Malmo", 0), server("b", "se", "Malmo", 0)];
        assert_eq!(Server::weight_chooser(&servers).unwrap().hostname, "a");
    }

    #[test]
    fn test_catalog_filters_by_location() {
        let mut catalog = InMemoryServerCatalog::new(
            vec![
                server("se-1", "se", "Malmo", 1),
                server("de-1", "de", "Berlin", 1),
                server("de-2", "de", "Berlin", 1),
            ],
            ServerLocation::new("se", "Malmo"),
        );
        assert_eq!(catalog.servers().len(), 1);
        assert_eq!(catalog.locations().len(), 2);

        catalog.change_server("de", "Berlin");
        assert_eq!(catalog.current(), ServerLocation::new("de", "Berlin"));
        assert_eq!(catalog.servers().len(), 2);
    }
}
