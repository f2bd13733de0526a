//! Gateway configuration read from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CATALOG_PATH: &str = "portbroker.toml";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// How candidate providers are chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// Walk the resolver's candidate list for the active strategy.
    #[default]
    Strategy,
    /// Try every active provider by name, mapping Claude names per provider.
    Legacy,
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strategy" => Ok(RoutingMode::Strategy),
            "legacy" => Ok(RoutingMode::Legacy),
            other => Err(format!("unknown routing mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub host: IpAddr,
    pub port: u16,
    pub catalog_path: PathBuf,
    pub request_timeout: Duration,
    pub routing_mode: RoutingMode,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            routing_mode: RoutingMode::Strategy,
        }
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable values fall back
    /// to the defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: parse_or("HOST", lookup("HOST"), defaults.host),
            port: parse_or("PORT", lookup("PORT"), defaults.port),
            catalog_path: lookup("PORTBROKER_CATALOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            request_timeout: Duration::from_secs(parse_or(
                "REQUEST_TIMEOUT_SECS",
                lookup("REQUEST_TIMEOUT_SECS"),
                DEFAULT_TIMEOUT_SECS,
            )),
            routing_mode: parse_or("ROUTING_MODE", lookup("ROUTING_MODE"), defaults.routing_mode),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[]));
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "not-a-port"),
            ("PORTBROKER_CATALOG", "/etc/portbroker/catalog.toml"),
            ("REQUEST_TIMEOUT_SECS", "30"),
            ("ROUTING_MODE", "Legacy"),
        ]));
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:8000");
        assert_eq!(config.catalog_path, PathBuf::from("/etc/portbroker/catalog.toml"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.routing_mode, RoutingMode::Legacy);
    }
}
