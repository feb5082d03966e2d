//! HTTP CONNECT tunnel handler.
//!
//! Handles `CONNECT host:port HTTP/1.1` requests by:
//! 1. Classifying the host against the rule registry (host only — no
//!    path is visible for a tunnel, so whitelists do not apply)
//! 2. Blocked: responding `403` and closing; no outbound socket is
//!    ever opened for a blocked host
//! 3. Allowed: connecting to the target, returning
//!    `200 Connection Established`, and relaying bytes bidirectionally
//!
//! The proxy never terminates TLS — once established, the tunnel is an
//! opaque byte pipe in both directions until either side closes.

use crate::audit;
use crate::error::{ProxyError, Result};
use crate::rules::SharedRules;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Timeout for destination TCP connect.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle an HTTP CONNECT request.
///
/// `first_line` is the already-read CONNECT line (e.g.
/// "CONNECT youtube.com:443 HTTP/1.1"). `buffered` holds any bytes the
/// server's BufReader read ahead past the tunnel negotiation; they are
/// flushed to the destination before the relay starts.
pub async fn handle_tunnel(
    first_line: &str,
    stream: &mut TcpStream,
    rules: &SharedRules,
    buffered: &[u8],
) -> Result<()> {
    let (host, port) = match parse_connect_target(first_line) {
        Ok(t) => t,
        Err(e) => {
            debug!("Rejecting CONNECT: {}", e);
            send_response(stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };
    debug!("CONNECT request to {}:{}", host, port);

    let verdict = rules.classify_host(&host);
    let target = format!("{}:{}", host, port);
    if verdict.is_blocked() {
        audit::log_blocked(audit::ProxyMode::Tunnel, &target, &verdict.reason());
        send_response(stream, 403, "Forbidden").await?;
        return Ok(());
    }
    audit::log_allowed(audit::ProxyMode::Tunnel, &target, &verdict.reason());

    // Destination unreachable: close the client without establishing
    // the tunnel. Retrying is the client's responsibility.
    let mut upstream = match connect_upstream(&host, port).await {
        Ok(s) => s,
        Err(e) => {
            debug!("Tunnel destination connect failed: {}", e);
            return Err(e);
        }
    };

    send_response(stream, 200, "Connection Established").await?;

    if !buffered.is_empty() {
        upstream.write_all(buffered).await?;
        upstream.flush().await?;
    }

    // Bidirectional relay until either side closes or errors; both
    // sockets are torn down together when this returns.
    let result = tokio::io::copy_bidirectional(stream, &mut upstream).await;
    debug!("Tunnel closed for {}: {:?}", target, result);

    Ok(())
}

/// Parse the target host and port from a CONNECT request line.
///
/// Expected format: "CONNECT host:port HTTP/1.1"; the port defaults to
/// 443 when absent.
fn parse_connect_target(line: &str) -> Result<(String, u16)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 || parts[0] != "CONNECT" {
        return Err(ProxyError::HttpParse(format!(
            "malformed CONNECT line: {}",
            line
        )));
    }

    let authority = parts[1];
    if authority.is_empty() {
        return Err(ProxyError::HttpParse("empty CONNECT target".to_string()));
    }
    if let Some((host, port_str)) = authority.rsplit_once(':') {
        let port = port_str.parse::<u16>().map_err(|_| {
            ProxyError::HttpParse(format!("invalid port in CONNECT: {}", authority))
        })?;
        Ok((host.to_string(), port))
    } else {
        // No port specified, default to 443 for CONNECT
        Ok((authority.to_string(), 443))
    }
}

/// Connect to the tunnel destination with timeout.
async fn connect_upstream(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            host: host.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamConnect {
            host: host.to_string(),
            reason: "connection timed out".to_string(),
        }),
    }
}

/// Send an HTTP response line to the client.
async fn send_response(stream: &mut TcpStream, status: u16, reason: &str) -> Result<()> {
    let response = format!("HTTP/1.1 {} {}\r\n\r\n", status, reason);
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_with_port() {
        let (host, port) = parse_connect_target("CONNECT youtube.com:443 HTTP/1.1").unwrap();
        assert_eq!(host, "youtube.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_connect_without_port() {
        let (host, port) = parse_connect_target("CONNECT example.com HTTP/1.1").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_connect_custom_port() {
        let (host, port) = parse_connect_target("CONNECT internal:8443 HTTP/1.1").unwrap();
        assert_eq!(host, "internal");
        assert_eq!(port, 8443);
    }

    #[test]
    fn test_parse_connect_malformed() {
        assert!(parse_connect_target("GET /").is_err());
        assert!(parse_connect_target("").is_err());
        assert!(parse_connect_target("CONNECT host:notaport HTTP/1.1").is_err());
    }
}
