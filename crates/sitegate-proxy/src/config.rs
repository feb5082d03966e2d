//! Proxy configuration types.
//!
//! Defines the server bind address and the blocked-site rules seeded
//! into the registry at startup. Loading from disk is the caller's
//! concern; these types only define the shape.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Configuration for the proxy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    #[serde(default)]
    pub bind_port: u16,

    /// Sites to block, registered at startup.
    #[serde(default)]
    pub blocked_sites: Vec<SiteConfig>,

    /// Maximum concurrent connections (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: 0,
            blocked_sites: Vec::new(),
            max_connections: 256,
        }
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

/// One blocked site: a domain and the path prefixes exempt from
/// blocking on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Domain to block (canonicalized at registration)
    pub domain: String,

    /// Path prefixes that stay reachable on the blocked domain.
    #[serde(default)]
    pub allow_paths: Vec<String>,
}
