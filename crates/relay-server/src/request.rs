//! Parsing of relay upgrade requests.
//!
//! Two forms are accepted:
//!
//! - `/relay?sessionId=<uuid>&accessToken=<token>&role=<requester|responder>[&peerId=<uuid>][&timeout=<secs>]`
//! - `/bridge/<uuid>/<token>` (no role; first come takes the initiator role)
//!
//! Anything else is rejected before the WebSocket upgrade completes.

use relay_core::{PeerId, RelayRequest, Role, SessionId};
use std::fmt;
use std::time::Duration;

const RELAY_FORM: &str =
    "/relay?sessionId={session-id (UUID)}&accessToken={accessToken}&role={requester|responder}";
const BRIDGE_FORM: &str = "/bridge/{session-id (UUID)}/{accessToken}";

/// Which endpoint a request addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Relay,
    Bridge,
}

impl Endpoint {
    fn expected_form(self) -> &'static str {
        match self {
            Endpoint::Relay => RELAY_FORM,
            Endpoint::Bridge => BRIDGE_FORM,
        }
    }
}

/// Handshake timeout bounds applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLimits {
    pub default: Duration,
    pub max: Duration,
}

/// A validated upgrade request, not yet bound to a deadline.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub endpoint: Endpoint,
    pub session_id: SessionId,
    pub access_token: String,
    pub role: Option<Role>,
    pub peer_id: Option<PeerId>,
    pub timeout: Duration,
}

impl ParsedRequest {
    /// Start the handshake clock now.
    pub fn into_relay_request(self) -> RelayRequest {
        let mut request = RelayRequest::new(
            self.session_id,
            self.access_token,
            self.role,
            self.timeout,
        );
        if let Some(peer_id) = self.peer_id {
            request = request.with_peer_id(peer_id);
        }
        request
    }
}

/// Why a request was refused. Rendered as the HTTP 400 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadRequest {
    pub message: String,
    pub expected_form: &'static str,
}

impl BadRequest {
    fn new(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected_form: endpoint.expected_form(),
        }
    }

    /// Response body sent with the 400.
    pub fn body(&self) -> String {
        format!(
            "{}\n\nPath should be in the form of '{}'.",
            self.message, self.expected_form
        )
    }
}

impl fmt::Display for BadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BadRequest {}

/// Parse the request target (`path` plus optional `query`).
pub fn parse(path: &str, query: Option<&str>, limits: TimeoutLimits) -> Result<ParsedRequest, BadRequest> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.first() {
        Some(&"relay") if segments.len() == 1 => parse_relay(query.unwrap_or(""), limits),
        Some(&"bridge") => parse_bridge(&segments, limits),
        _ => Err(BadRequest::new(
            Endpoint::Relay,
            format!("Unknown path '{path}'."),
        )),
    }
}

fn parse_relay(query: &str, limits: TimeoutLimits) -> Result<ParsedRequest, BadRequest> {
    let bad = |message: &str| BadRequest::new(Endpoint::Relay, message);

    let mut session_id = None;
    let mut access_token = None;
    let mut role = None;
    let mut peer_id = None;
    let mut timeout = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "sessionId" => session_id = Some(value.into_owned()),
            "accessToken" => access_token = Some(value.into_owned()),
            "role" => role = Some(value.into_owned()),
            "peerId" => peer_id = Some(value.into_owned()),
            "timeout" => timeout = Some(value.into_owned()),
            _ => {}
        }
    }

    let session_id: SessionId = session_id
        .as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad("Invalid or missing session ID."))?;

    let access_token = access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad("Invalid or missing access token."))?;

    let role: Role = role
        .as_deref()
        .and_then(|r| r.parse().ok())
        .ok_or_else(|| bad("Invalid or missing role."))?;

    let peer_id = match peer_id {
        Some(p) => Some(p.parse::<PeerId>().map_err(|_| bad("Peer ID is not a valid UUID."))?),
        None => None,
    };

    let timeout = parse_timeout(timeout.as_deref(), limits).map_err(|m| bad(&m))?;

    Ok(ParsedRequest {
        endpoint: Endpoint::Relay,
        session_id,
        access_token,
        role: Some(role),
        peer_id,
        timeout,
    })
}

fn parse_bridge(segments: &[&str], limits: TimeoutLimits) -> Result<ParsedRequest, BadRequest> {
    let bad = |message: &str| BadRequest::new(Endpoint::Bridge, message);

    if segments.len() < 3 {
        return Err(bad("Path should have at least 3 parts."));
    }
    let session_segment = segments[segments.len() - 2];
    let token_segment = segments[segments.len() - 1];

    let session_id: SessionId = session_segment
        .parse()
        .map_err(|_| bad("Session ID is not a valid UUID."))?;
    let access_token = token_segment.to_string();

    Ok(ParsedRequest {
        endpoint: Endpoint::Bridge,
        session_id,
        access_token,
        role: None,
        peer_id: None,
        timeout: limits.default,
    })
}

fn parse_timeout(raw: Option<&str>, limits: TimeoutLimits) -> Result<Duration, String> {
    let Some(raw) = raw else {
        return Ok(limits.default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| "Timeout must be a whole number of seconds.".to_string())?;
    let timeout = Duration::from_secs(secs);
    if secs == 0 || timeout > limits.max {
        return Err(format!(
            "Timeout must be between 1 and {} seconds.",
            limits.max.as_secs()
        ));
    }
    Ok(timeout)
}
