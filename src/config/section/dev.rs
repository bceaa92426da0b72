//! `[dev]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [dev]
//! interface = "127.0.0.1"     # Network interface (127.0.0.1 = localhost only)
//! port = 5277                 # HTTP port number
//! watch = true                # Watch files and push hot updates
//! handle_http = false         # Cook http(s) URLs too
//! ```
//!
//! Use `interface = "0.0.0.0"` to make the server accessible from LAN.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Development server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Network interface to bind.
    /// - `127.0.0.1` (default): localhost only
    /// - `0.0.0.0`: all interfaces (LAN accessible)
    pub interface: IpAddr,

    /// HTTP port number.
    pub port: u16,

    /// Enable file watcher for hot reload.
    pub watch: bool,

    /// Fetch and transform `http(s):` URLs instead of leaving them to the browser.
    pub handle_http: bool,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 5277,
            watch: true,
            handle_http: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use crate::config::test_parse_config;

    #[test]
    fn test_dev_config() {
        let config = test_parse_config("[dev]\ninterface = \"0.0.0.0\"\nport = 8080\nwatch = false");

        assert_eq!(config.dev.interface, IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        assert_eq!(config.dev.port, 8080);
        assert!(!config.dev.watch);
        assert!(!config.dev.handle_http);
    }

    #[test]
    fn test_dev_config_defaults() {
        let config = test_parse_config("");

        assert_eq!(config.dev.interface, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(config.dev.port, 5277);
        assert!(config.dev.watch);
    }

    #[test]
    fn test_dev_config_ipv6() {
        let config = test_parse_config("[dev]\ninterface = \"::1\"");
        assert_eq!(config.dev.interface, IpAddr::V6(Ipv6Addr::LOCALHOST));
    }
}
