//! Proxy server: TCP listener, connection dispatch, and lifecycle.
//!
//! The server binds to the configured address (port 0 = OS-assigned),
//! accepts TCP connections, reads the request head to determine the
//! mode, and dispatches to the appropriate handler.
//!
//! CONNECT method -> [`tunnel`](crate::tunnel) handler
//! Other methods  -> [`plain`](crate::plain) handler

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::plain;
use crate::rules::SharedRules;
use crate::tunnel;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Maximum total size of HTTP headers (64 KiB). Prevents OOM from
/// malicious clients sending unbounded header data.
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Handle returned when the proxy server starts.
///
/// Carries the assigned port and the shared rule registry. Send to
/// `shutdown()` to stop accepting; in-flight relays are not aborted.
pub struct ProxyHandle {
    /// The actual port the proxy is listening on
    pub port: u16,
    /// Shared rule registry; writes are visible to handlers immediately
    rules: SharedRules,
    /// Send `true` to stop the accept loop
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyHandle {
    /// Stop accepting new connections. Established relays run to
    /// completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Register a blocked domain with its whitelisted path prefixes.
    ///
    /// Takes effect for the next classified request; re-registering a
    /// domain replaces its whitelist.
    pub fn register_blocked_domain(&self, domain: &str, allow_paths: &[String]) {
        self.rules.register(domain, allow_paths);
    }

    /// The shared rule registry.
    #[must_use]
    pub fn rules(&self) -> &SharedRules {
        &self.rules
    }

    /// Flat list of blocked domains for the OS firewall collaborator.
    #[must_use]
    pub fn blocked_domains(&self) -> Vec<String> {
        self.rules.blocked_domains()
    }
}

/// Shared state for the proxy server.
struct ProxyState {
    rules: SharedRules,
    max_connections: usize,
    /// Active connection count for connection limiting.
    active_connections: AtomicUsize,
}

/// Start the proxy server.
///
/// Binds to `config.bind_addr:config.bind_port` (port 0 = OS-assigned),
/// seeds the rule registry from `config.blocked_sites`, and begins
/// accepting connections.
///
/// Returns a `ProxyHandle` with the assigned port and the registry.
/// The server runs until `shutdown()` is called.
pub async fn start(config: ProxyConfig) -> Result<ProxyHandle> {
    let rules = SharedRules::new();
    for site in &config.blocked_sites {
        rules.register(&site.domain, &site.allow_paths);
    }

    let bind_addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ProxyError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;

    let local_addr = listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;
    let port = local_addr.port();

    info!(
        "Proxy server listening on {} ({} blocked domains)",
        local_addr,
        rules.rule_count()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(ProxyState {
        rules: rules.clone(),
        max_connections: config.max_connections,
        active_connections: AtomicUsize::new(0),
    });

    tokio::spawn(accept_loop(listener, state, shutdown_rx));

    Ok(ProxyHandle {
        port,
        rules,
        shutdown_tx,
    })
}

/// Accept loop: listen for connections until shutdown.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let max = state.max_connections;
                        if max > 0 {
                            let current = state.active_connections.load(Ordering::Relaxed);
                            if current >= max {
                                warn!("Connection limit reached ({}/{}), rejecting {}", current, max, addr);
                                drop(stream);
                                continue;
                            }
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);

                        debug!("Accepted connection from {}", addr);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &state).await {
                                debug!("Connection handler error: {}", e);
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Proxy server shutting down");
                    return;
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Reads the request head through a BufReader, then dispatches on the
/// method: CONNECT goes to the tunnel handler, everything else to the
/// plain handler.
async fn handle_connection(mut stream: tokio::net::TcpStream, state: &ProxyState) -> Result<()> {
    // Keep the BufReader alive until the full head is consumed: it may
    // read ahead into the body, and those bytes must not be lost.
    let mut buf_reader = BufReader::new(&mut stream);
    let mut first_line = String::new();
    buf_reader.read_line(&mut first_line).await?;

    if first_line.is_empty() {
        return Ok(()); // Client disconnected
    }

    // Read remaining headers (up to empty line), with size limit.
    let mut header_bytes = Vec::new();
    loop {
        let mut line = String::new();
        let n = buf_reader.read_line(&mut line).await?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
        header_bytes.extend_from_slice(line.as_bytes());
        if header_bytes.len() > MAX_HEADER_SIZE {
            drop(buf_reader);
            let response = "HTTP/1.1 431 Request Header Fields Too Large\r\n\r\n";
            stream.write_all(response.as_bytes()).await?;
            return Ok(());
        }
    }

    // Capture any data buffered beyond the headers before dropping the
    // BufReader: body bytes for a plain request, early tunnel bytes for
    // CONNECT.
    let buffered = buf_reader.buffer().to_vec();
    drop(buf_reader);

    let first_line = first_line.trim_end();

    if first_line.starts_with("CONNECT ") {
        tunnel::handle_tunnel(first_line, &mut stream, &state.rules, &buffered).await
    } else {
        plain::handle_plain(
            first_line,
            &mut stream,
            &state.rules,
            &header_bytes,
            &buffered,
        )
        .await
    }
}
