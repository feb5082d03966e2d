//! Audit logging for proxy decisions.
//!
//! Logs every allow/block decision with structured fields via
//! `tracing`. Request bodies and tunneled payloads are never logged.

use tracing::info;

/// Proxy mode for audit logging.
#[derive(Debug, Clone, Copy)]
pub enum ProxyMode {
    /// Plain HTTP forwarding
    Plain,
    /// CONNECT tunnel (host-only classification)
    Tunnel,
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Plain => write!(f, "plain"),
            ProxyMode::Tunnel => write!(f, "tunnel"),
        }
    }
}

/// Log an allowed request.
pub fn log_allowed(mode: ProxyMode, target: &str, reason: &str) {
    info!(
        target: "sitegate_proxy::audit",
        mode = %mode,
        request_target = target,
        decision = "allow",
        reason = reason,
        "request allowed"
    );
}

/// Log a blocked request.
pub fn log_blocked(mode: ProxyMode, target: &str, reason: &str) {
    info!(
        target: "sitegate_proxy::audit",
        mode = %mode,
        request_target = target,
        decision = "block",
        reason = reason,
        "request blocked"
    );
}
