//! WebSocket listener using tokio-tungstenite.
//!
//! The upgrade request is parsed inside the handshake callback, so malformed
//! requests get an HTTP 400 and never become WebSocket connections.

use crate::request::{self, ParsedRequest, TimeoutLimits};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Accepted connections waiting for the server loop.
const ACCEPT_QUEUE: usize = 64;

/// An upgraded WebSocket together with the relay request that opened it.
pub struct RelayConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    pub request: ParsedRequest,
}

/// Bind `bind_addr` and start accepting relay upgrades.
///
/// Returns the bound address (useful with port 0) and a receiver that yields
/// accepted connections. The accept task stops once the receiver is dropped.
pub async fn start_listener(
    bind_addr: SocketAddr,
    limits: TimeoutLimits,
) -> std::io::Result<(SocketAddr, mpsc::Receiver<RelayConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr).await?;
    let local_addr = tcp_listener.local_addr()?;
    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<RelayConnection>(ACCEPT_QUEUE);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = tcp_listener.accept() => accepted,
                _ = tx.closed() => break,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if let Some(conn) = upgrade(stream, addr, limits).await {
                            if tx.send(conn).await.is_err() {
                                warn!("WebSocket connection channel closed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
        debug!("WebSocket listener stopped");
    });

    Ok((local_addr, rx))
}

async fn upgrade(
    stream: TcpStream,
    remote_addr: SocketAddr,
    limits: TimeoutLimits,
) -> Option<RelayConnection> {
    let mut parsed = None;
    let callback = |req: &Request, response: Response| {
        let uri = req.uri();
        match request::parse(uri.path(), uri.query(), limits) {
            Ok(request) => {
                parsed = Some(request);
                Ok(response)
            }
            Err(bad) => {
                warn!(remote = %remote_addr, uri = %uri, error = %bad, "bad relay request");
                Err(bad_request(bad.body()))
            }
        }
    };

    let upgraded = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    match upgraded {
        Ok(ws_stream) => {
            let request = parsed?;
            debug!(
                remote = %remote_addr,
                session_id = %request.session_id,
                "WebSocket connection accepted"
            );
            Some(RelayConnection {
                ws_stream,
                remote_addr,
                request,
            })
        }
        Err(e) => {
            debug!(remote = %remote_addr, error = %e, "WebSocket handshake failed");
            None
        }
    }
}

fn bad_request(body: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}
