//! Core server: accepts relay upgrades and hands each one to the coordinator.

use crate::config::ServerConfig;
use crate::listener::{self, RelayConnection};
use relay_core::transport::WebSocketTransport;
use relay_core::RelayCoordinator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A bound, not yet serving, listener.
pub struct BoundListener {
    pub local_addr: SocketAddr,
    connections: mpsc::Receiver<RelayConnection>,
}

/// The relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    coordinator: Arc<RelayCoordinator>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let coordinator = Arc::new(RelayCoordinator::new(config.coordinator_config()));
        Self {
            config,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<RelayCoordinator> {
        &self.coordinator
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<BoundListener> {
        let (local_addr, connections) =
            listener::start_listener(self.config.bind_addr, self.config.timeout_limits()).await?;
        Ok(BoundListener {
            local_addr,
            connections,
        })
    }

    /// Serve connections until the listener stops.
    pub async fn serve(self: Arc<Self>, listener: BoundListener) {
        info!(
            addr = %listener.local_addr,
            max_sessions = self.config.max_sessions,
            handshake_timeout_secs = self.config.handshake_timeout.as_secs(),
            "relay-server ready"
        );

        let mut connections = listener.connections;
        while let Some(conn) = connections.recv().await {
            let srv = self.clone();
            tokio::spawn(async move { srv.handle_websocket(conn).await });
        }
        info!("listener closed");
    }

    /// Dispose every live session.
    pub async fn shutdown(&self) {
        let live = self.coordinator.registry().list().await;
        if !live.is_empty() {
            match serde_json::to_string(&live) {
                Ok(json) => info!(count = live.len(), sessions = %json, "live sessions at shutdown"),
                Err(e) => debug!(error = %e, "cannot serialize session list"),
            }
        }
        self.coordinator.shutdown().await;
    }

    async fn handle_websocket(&self, conn: RelayConnection) {
        let remote = conn.remote_addr;
        let request = conn.request.into_relay_request();
        let session_id = request.session_id;
        let transport = Box::new(WebSocketTransport::new(conn.ws_stream));

        match self.coordinator.handle_connection(request, transport).await {
            Ok(outcome) => match outcome.report {
                Some(report) => info!(
                    remote = %remote,
                    session_id = %session_id,
                    role = %outcome.role,
                    bytes = report.bytes_forwarded(),
                    duration_ms = report.duration.as_millis() as u64,
                    "relay connection finished"
                ),
                None => debug!(
                    remote = %remote,
                    session_id = %session_id,
                    role = %outcome.role,
                    "session closed before relaying"
                ),
            },
            Err(e) if e.is_protocol_violation() => {
                warn!(remote = %remote, session_id = %session_id, error = %e, "relay request rejected");
            }
            Err(e) => {
                info!(remote = %remote, session_id = %session_id, error = %e, "relay connection ended");
            }
        }
    }
}
