//! Plain HTTP request handler.
//!
//! Handles non-CONNECT requests by:
//! 1. Building the absolute target URL (absolute-URI request line, or
//!    Host header + origin-form path)
//! 2. Classifying the target against the rule registry
//! 3. Blocked: rendering a block page; the origin is never contacted
//! 4. Allowed: forwarding the request to the origin and relaying the
//!    response byte-for-byte, without buffering bodies
//!
//! A request with no usable Host information is rejected with `400`
//! before any classification or relay is attempted.

use crate::audit;
use crate::error::{ProxyError, Result};
use crate::rules::SharedRules;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Timeout for origin TCP connect.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination derived from a plain request.
#[derive(Debug, PartialEq, Eq)]
struct PlainTarget {
    /// Absolute URL used for classification
    absolute_url: String,
    /// Origin host to connect to
    host: String,
    /// Origin port to connect to
    port: u16,
    /// Origin-form path (+ query) for the forwarded request line
    origin_path: String,
}

/// Handle a plain (non-CONNECT) HTTP request.
///
/// `first_line` is the already-read request line. `header_bytes` holds
/// the raw header block (without the terminating blank line) and
/// `buffered_body` any bytes the server's BufReader read ahead past
/// the headers; both are forwarded verbatim on relay.
pub async fn handle_plain(
    first_line: &str,
    stream: &mut TcpStream,
    rules: &SharedRules,
    header_bytes: &[u8],
    buffered_body: &[u8],
) -> Result<()> {
    let (method, raw_target, version) = match parse_request_line(first_line) {
        Ok(parts) => parts,
        Err(e) => {
            debug!("Rejecting plain request: {}", e);
            send_response(stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    let target = match resolve_target(&raw_target, header_bytes) {
        Ok(t) => t,
        Err(e) => {
            debug!("Rejecting plain request: {}", e);
            send_response(stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };
    debug!("Plain request: {} {}", method, target.absolute_url);

    let verdict = rules.classify_url(&target.absolute_url);
    if verdict.is_blocked() {
        audit::log_blocked(audit::ProxyMode::Plain, &target.absolute_url, &verdict.reason());
        send_block_page(stream, &target.absolute_url).await?;
        return Ok(());
    }
    audit::log_allowed(audit::ProxyMode::Plain, &target.absolute_url, &verdict.reason());

    let mut upstream = match connect_upstream(&target.host, target.port).await {
        Ok(s) => s,
        Err(e) => {
            warn!("Origin connection failed: {}", e);
            send_response(stream, 500, "Internal Server Error").await?;
            return Ok(());
        }
    };

    // Forward the request head: origin-form request line, then the
    // client's headers verbatim, then any body bytes already buffered.
    let request_line = format!("{} {} {}\r\n", method, target.origin_path, version);
    upstream.write_all(request_line.as_bytes()).await?;
    upstream.write_all(header_bytes).await?;
    upstream.write_all(b"\r\n").await?;
    if !buffered_body.is_empty() {
        upstream.write_all(buffered_body).await?;
    }
    upstream.flush().await?;

    // Relay the rest of the request body and the full response without
    // buffering. Either side closing tears down both sockets.
    let result = tokio::io::copy_bidirectional(stream, &mut upstream).await;
    debug!("Plain relay closed for {}: {:?}", target.absolute_url, result);

    Ok(())
}

/// Parse an HTTP request line into (method, target, version).
fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ProxyError::HttpParse(format!(
            "malformed request line: {}",
            line
        )));
    }
    Ok((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
    ))
}

/// Resolve the request target into an absolute URL and a connect
/// destination.
///
/// Absolute-URI request lines (`GET http://host/path HTTP/1.1`) are
/// used as-is; origin-form lines (`GET /path HTTP/1.1`) need the Host
/// header. A missing or empty Host header is a protocol error, not a
/// classification failure.
fn resolve_target(raw_target: &str, header_bytes: &[u8]) -> Result<PlainTarget> {
    if raw_target.starts_with("http://") || raw_target.starts_with("https://") {
        let parsed = url::Url::parse(raw_target)
            .map_err(|e| ProxyError::HttpParse(format!("invalid request URL '{}': {}", raw_target, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::HttpParse(format!("missing host in URL: {}", raw_target)))?
            .to_string();
        let default_port = if parsed.scheme() == "https" { 443 } else { 80 };
        let port = parsed.port().unwrap_or(default_port);

        let mut origin_path = parsed.path().to_string();
        if origin_path.is_empty() {
            origin_path.push('/');
        }
        if let Some(query) = parsed.query() {
            origin_path.push('?');
            origin_path.push_str(query);
        }

        return Ok(PlainTarget {
            absolute_url: raw_target.to_string(),
            host,
            port,
            origin_path,
        });
    }

    // Origin-form: the Host header names the destination.
    let authority = find_host_header(header_bytes)
        .ok_or_else(|| ProxyError::HttpParse("missing Host header".to_string()))?;
    let (host, port) = split_authority(&authority)?;

    Ok(PlainTarget {
        absolute_url: format!("http://{}{}", authority, raw_target),
        host,
        port,
        origin_path: raw_target.to_string(),
    })
}

/// Extract the Host header value from raw header bytes.
fn find_host_header(header_bytes: &[u8]) -> Option<String> {
    let header_str = std::str::from_utf8(header_bytes).ok()?;
    for line in header_str.lines() {
        if line.to_lowercase().starts_with("host:") {
            let value = line.split_once(':').map(|(_, v)| v.trim()).unwrap_or("");
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

/// Split a `host[:port]` authority, defaulting to port 80.
fn split_authority(authority: &str) -> Result<(String, u16)> {
    if let Some((host, port_str)) = authority.rsplit_once(':') {
        let port = port_str
            .parse::<u16>()
            .map_err(|_| ProxyError::HttpParse(format!("invalid port in Host: {}", authority)))?;
        Ok((host.to_string(), port))
    } else {
        Ok((authority.to_string(), 80))
    }
}

/// Connect to the origin with timeout.
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

/// Send a bare HTTP response line to the client.
async fn send_response(stream: &mut TcpStream, status: u16, reason: &str) -> Result<()> {
    let response = format!("HTTP/1.1 {} {}\r\n\r\n", status, reason);
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Send the block page for a blocked target.
///
/// A `200` with an HTML notice rather than an error status, so that
/// browsers render the page instead of a connection-error screen.
async fn send_block_page(stream: &mut TcpStream, target: &str) -> Result<()> {
    let body = render_block_page(target);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Render the HTML block notice identifying the blocked target.
fn render_block_page(target: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Site blocked</title></head>\n<body>\n\
         <h1>Site blocked</h1>\n\
         <p>Access to <code>{}</code> is blocked by sitegate.</p>\n\
         </body>\n</html>\n",
        target
    )
}
