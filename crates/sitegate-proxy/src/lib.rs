//! Selective site-blocking forward proxy.
//!
//! `sitegate-proxy` accepts standard HTTP forward-proxy traffic and
//! decides per request whether to block or relay:
//!
//! 1. **Plain requests** (`plain`) - The full target URL is visible.
//!    Blocked targets get a rendered block page; allowed targets are
//!    relayed to the origin byte-for-byte.
//!
//! 2. **CONNECT tunnels** (`tunnel`) - Only `host:port` is visible.
//!    Registered domains are refused with `403`; everything else gets
//!    an opaque bidirectional tunnel. Tunneled payloads are never
//!    inspected or decrypted.
//!
//! Rules live in a shared registry (`rules`) backed by the `sitegate`
//! core crate; the configuration path writes it, handlers only read.

pub mod audit;
pub mod config;
pub mod error;
pub mod plain;
pub mod rules;
pub mod server;
pub mod tunnel;

pub use config::{ProxyConfig, SiteConfig};
pub use error::{ProxyError, Result};
pub use rules::SharedRules;
pub use server::{start, ProxyHandle};
