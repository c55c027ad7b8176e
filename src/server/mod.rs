// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP server for the bundled proxy.
//!
//! The server is a thin wrapper around **hyper-util**: it owns the listening
//! socket, serves every connection with
//! `hyper_util::server::conn::auto::Builder` (HTTP/1.1 and HTTP/2 on the same
//! port) and hands each request to [`ProxyCore::process_request`].
//!
//! On Ctrl-C or SIGTERM it stops accepting, asks open connections to finish
//! their in-flight exchanges and waits up to 30 seconds for them to drain.

mod health;


use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::core::ProxyError;
use crate::proxy::ProxyCore;
pub use health::HealthServer;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port to listen on for health/readiness checks
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_health_port() -> u16 {
    8081
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            health_port: default_health_port(),
        }
    }
}

/// HTTP server for the proxy.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    config: ServerConfig,
    core: Arc<ProxyCore>,
    active_connections: Arc<AtomicUsize>,
}

impl ProxyServer {
    /// Create a new proxy server with the given configuration and proxy core.
    pub fn new(config: ServerConfig, core: Arc<ProxyCore>) -> Self {
        Self {
            config,
            core,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The proxy core requests are handed to.
    pub fn core(&self) -> &Arc<ProxyCore> {
        &self.core
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    pub async fn start(&self) -> Result<(), ProxyError> {
        let addr = format!("{}:{}", self.config.host, self.config.port)
            .parse::<SocketAddr>()
            .map_err(|e| ProxyError::Other(format!("Invalid server address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to bind {}: {}", addr, e)))?;

        let health_server = HealthServer::new(self.config.health_port);
        health_server.set_ready();

        let result = self.serve(listener, shutdown_signal()).await;

        drop(health_server);
        result
    }

    /// Serve connections from `listener` until `shutdown` resolves, then drain.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!(
            "Errata proxy listening on http://{} (upstream {}, filter {})",
            local_addr,
            self.core.upstream_url(),
            self.core.filter_name()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut join_set = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, remote_addr)) => {
                            let core = self.core.clone();
                            let shutdown_rx = shutdown_rx.clone();
                            join_set.spawn(serve_connection(stream, remote_addr, core, shutdown_rx));
                            self.active_connections.store(join_set.len(), Ordering::Relaxed);
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                // Reap finished connections so the set only holds live ones
                Some(res) = join_set.join_next(), if !join_set.is_empty() => {
                    log_join_result(res);
                    self.active_connections.store(join_set.len(), Ordering::Relaxed);
                }
            }
        }

        info!("Shutting down; waiting for {} connection(s)", join_set.len());
        // Receivers only go away with their connection, so a send error is fine
        let _ = shutdown_tx.send(true);

        let drain = async {
            while let Some(res) = join_set.join_next().await {
                log_join_result(res);
            }
        };

        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(
                "Shutdown timed out after {} seconds, closing remaining connections",
                DRAIN_TIMEOUT.as_secs()
            );
            join_set.shutdown().await;
        }

        self.active_connections.store(0, Ordering::Relaxed);
        info!("Shutdown complete");
        Ok(())
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    core: Arc<ProxyCore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let client_ip = remote_addr.ip().to_string();
    let service = service_fn(move |req: Request<Incoming>| {
        let core = core.clone();
        let client_ip = client_ip.clone();
        async move { handle_request(req, core, client_ip).await }
    });

    let builder = AutoBuilder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(connection);

    // The watch guard must not outlive the wait, or the task is not Send
    let stop_requested = async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    };

    tokio::select! {
        res = &mut conn => log_connection_result(res),
        _ = stop_requested => {
            debug!("Connection from {} received shutdown signal", remote_addr);
            conn.as_mut().graceful_shutdown();
            log_connection_result(conn.await);
        }
    }
}

fn log_join_result(res: Result<(), tokio::task::JoinError>) {
    match res {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("Connection task cancelled"),
        Err(e) => error!("Connection task failed: {}", e),
    }
}

fn log_connection_result(res: Result<(), Box<dyn std::error::Error + Send + Sync>>) {
    match res {
        Ok(()) => debug!("Connection closed normally"),
        Err(e) => {
            let err_str = e.to_string();
            if !err_str.contains("connection closed") && !err_str.contains("connection reset") {
                error!("Connection error: {}", e);
            }
        }
    }
}

/// Handle an incoming HTTP request.
async fn handle_request(
    req: Request<Incoming>,
    core: Arc<ProxyCore>,
    client_ip: String,
) -> Result<Response<reqwest::Body>, Infallible> {
    debug!("Received request: {} {} over {:?}", req.method(), req.uri(), req.version());
    Ok(core.process_request(req, &client_ip).await)
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C; initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM; initiating graceful shutdown"),
    }
}
