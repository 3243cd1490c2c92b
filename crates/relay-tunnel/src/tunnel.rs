//! TCP tunneling through a relay session.
//!
//! One side of the pump is a local TCP socket, the other a WebSocket to the
//! relay. `forward` is the device side (connects out to a local service);
//! `listen` is the viewer side (accepts one local client).

use anyhow::{bail, Context, Result};
use relay_core::transport::{TcpTransport, WebSocketTransport};
use relay_core::{PumpEnd, PumpReport, RelayPump, Role, SessionId};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use url::Url;

/// How often and how patiently to retry local socket setup.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Everything needed to join one relay session.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub relay_url: Url,
    pub session_id: SessionId,
    pub access_token: String,
    /// Seconds the relay should wait for our partner; `None` uses its default.
    pub handshake_timeout: Option<u64>,
    pub retry: RetryPolicy,
}

impl TunnelOptions {
    /// `/relay` URL for this session and `role`.
    pub fn request_url(&self, role: Role) -> Result<Url> {
        let mut url = self.relay_url.clone();
        match url.scheme() {
            "ws" | "wss" => {}
            "http" => set_scheme(&mut url, "ws")?,
            "https" => set_scheme(&mut url, "wss")?,
            other => bail!("unsupported relay URL scheme '{other}'"),
        }
        url.set_path("/relay");
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("sessionId", &self.session_id.to_string())
                .append_pair("accessToken", &self.access_token)
                .append_pair("role", wire_role(role));
            if let Some(timeout) = self.handshake_timeout {
                query.append_pair("timeout", &timeout.to_string());
            }
        }
        Ok(url)
    }
}

fn set_scheme(url: &mut Url, scheme: &str) -> Result<()> {
    url.set_scheme(scheme)
        .map_err(|()| anyhow::anyhow!("cannot use scheme '{scheme}' for {url}"))
}

/// Role names as the relay endpoint spells them.
fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Initiator => "requester",
        Role::Responder => "responder",
    }
}

/// Run `op` up to `policy.attempts` times, sleeping between failures.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(what, attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("{what} failed after {attempts} attempts"))
            }
        }
    }
}

async fn connect_relay(
    url: &Url,
) -> Result<WebSocketTransport<tokio_tungstenite::MaybeTlsStream<TcpStream>>> {
    let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to relay at {}", redact(url)))?;
    debug!(relay = %redact(url), "connected to relay");
    Ok(WebSocketTransport::new(ws))
}

/// URL without the access token, for logs and errors.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Device side: connect to `127.0.0.1:local_port`, then join the session as
/// responder and relay until either side closes or `cancel` resolves.
pub async fn forward<C>(options: &TunnelOptions, local_port: u16, cancel: C) -> Result<PumpReport>
where
    C: Future<Output = ()> + Send,
{
    info!(
        session_id = %options.session_id,
        local_port,
        "forwarding relay session to local service"
    );
    let local_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
    let local = retry(options.retry, "local connect", || TcpStream::connect(local_addr)).await?;

    let relay = connect_relay(&options.request_url(Role::Responder)?).await?;
    let report = RelayPump::new(options.session_id)
        .run(Box::new(relay), Box::new(TcpTransport::new(local)), cancel)
        .await;
    finished(options.session_id, report)
}

/// A relay that fails us before anything crossed never gave us a session.
fn finished(session_id: SessionId, report: PumpReport) -> Result<PumpReport> {
    if let PumpEnd::Failed(_, reason) = &report.end {
        if !report.any_forwarded() {
            bail!("could not establish session {session_id}: {reason}");
        }
    }
    info!(session_id = %session_id, bytes = report.bytes_forwarded(), "tunnel closed");
    Ok(report)
}

/// Bind the loopback listener used by [`listen`].
pub async fn bind_local(local_port: u16, policy: RetryPolicy) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
    retry(policy, "local bind", || TcpListener::bind(addr)).await
}

/// Viewer side: join the session as requester, accept one client on
/// `listener`, and relay until either side closes or `cancel` resolves.
pub async fn listen<C>(options: &TunnelOptions, listener: TcpListener, cancel: C) -> Result<PumpReport>
where
    C: Future<Output = ()> + Send,
{
    let local_addr = listener.local_addr()?;
    info!(
        session_id = %options.session_id,
        addr = %local_addr,
        "listening for a local client"
    );

    let relay = connect_relay(&options.request_url(Role::Initiator)?).await?;

    tokio::pin!(cancel);
    let client = tokio::select! {
        accepted = listener.accept() => {
            let (stream, peer) = accepted.context("accepting local client failed")?;
            debug!(peer = %peer, "local client connected");
            stream
        }
        _ = &mut cancel => bail!("cancelled before a local client connected"),
    };
    drop(listener);

    let report = RelayPump::new(options.session_id)
        .run(Box::new(relay), Box::new(TcpTransport::new(client)), cancel)
        .await;
    finished(options.session_id, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options(base: &str) -> TunnelOptions {
        TunnelOptions {
            relay_url: base.parse().unwrap(),
            session_id: "6f1c2a4e-9b7d-4c3e-8a51-2d9e0f7b6c11".parse().unwrap(),
            access_token: "a b&c".into(),
            handshake_timeout: Some(15),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn request_url_encodes_query() {
        let url = options("ws://relay.example:8080").request_url(Role::Initiator).unwrap();
        assert_eq!(url.path(), "/relay");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("accessToken".into(), "a b&c".into())));
        assert!(pairs.contains(&("role".into(), "requester".into())));
        assert!(pairs.contains(&("timeout".into(), "15".into())));
    }

    #[test]
    fn http_schemes_map_to_websocket() {
        let url = options("https://relay.example").request_url(Role::Responder).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert!(options("ftp://relay.example").request_url(Role::Responder).is_err());
    }

    #[test]
    fn redaction_drops_token() {
        let url = options("ws://relay.example").request_url(Role::Responder).unwrap();
        assert!(!redact(&url).contains("accessToken"));
    }

    fn report(end: PumpEnd, frames: u64) -> PumpReport {
        PumpReport {
            initiator_to_responder: relay_core::DirectionStats {
                bytes: frames * 4,
                frames,
            },
            responder_to_initiator: Default::default(),
            end,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn refusal_before_traffic_is_an_error() {
        let sid = options("ws://relay.example").session_id;
        let refused = PumpEnd::Failed(
            relay_core::Direction::InitiatorToResponder,
            "closed by peer (1008): access token mismatch".into(),
        );
        let err = finished(sid, report(refused.clone(), 0)).unwrap_err();
        assert!(err.to_string().contains("access token mismatch"));

        assert!(finished(sid, report(refused, 3)).is_ok());
        let ended = PumpEnd::Closed(relay_core::Direction::InitiatorToResponder);
        assert!(finished(sid, report(ended, 0)).is_ok());
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let result: Result<()> = retry(policy, "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let value = retry(RetryPolicy::default(), "test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(std::io::Error::from(std::io::ErrorKind::AddrInUse))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 1);
    }
}
