//! Server configuration.
//!
//! [`ServerConfig`] is built once at startup, from CLI arguments in the
//! binary or from defaults in tests, and handed to [`crate::server::bind`].

use std::net::{Ipv4Addr, SocketAddr};

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 8080;

/// Runtime configuration for the rendezvous server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    ///
    /// `0.0.0.0` accepts connections on every interface.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
        }
    }
}
