//! Relay coordinator: drives one incoming connection through rendezvous and
//! relaying.
//!
//! For each connection the coordinator obtains the session, checks the
//! access token, assigns a role, attaches the transport, signals readiness
//! and waits for the partner. Whichever handler takes the transports first
//! runs the pump; the other waits for the session to close. Both return the
//! same [`PumpReport`].

use crate::error::{RelayError, RelayResult};
use crate::ids::{PeerId, SessionId};
use crate::pump::{PumpReport, RelayPump, DEFAULT_CLOSE_TIMEOUT};
use crate::registry::SessionRegistry;
use crate::role::Role;
use crate::session::RelaySession;
use crate::token::AccessToken;
use crate::transport::{CloseReason, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Who may create a session that does not exist yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePolicy {
    /// The first caller creates the session, whatever its role.
    #[default]
    AnyRole,
    /// Only initiators (and roleless callers) create; a responder arriving
    /// first waits for the session to appear.
    InitiatorOnly,
}

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on graceful transport closes.
    pub close_timeout: Duration,
    pub create_policy: CreatePolicy,
    /// Maximum concurrent sessions (0 = unlimited).
    pub max_sessions: usize,
    /// How often a responder polls for a session under
    /// [`CreatePolicy::InitiatorOnly`].
    pub lookup_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            create_policy: CreatePolicy::AnyRole,
            max_sessions: 0,
            lookup_interval: Duration::from_millis(50),
        }
    }
}

/// One caller's request to join a session.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub session_id: SessionId,
    pub access_token: String,
    /// `None` takes whichever role is free.
    pub role: Option<Role>,
    pub peer_id: PeerId,
    /// Rendezvous must complete by this instant.
    pub deadline: Instant,
}

impl RelayRequest {
    /// Request with a fresh peer id and a deadline `timeout` from now.
    pub fn new(
        session_id: SessionId,
        access_token: impl Into<String>,
        role: Option<Role>,
        timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            access_token: access_token.into(),
            role,
            peer_id: PeerId::new_random(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = peer_id;
        self
    }
}

/// What happened to a connection that made it through rendezvous.
#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    pub session_id: SessionId,
    pub role: Role,
    pub peer_id: PeerId,
    /// `None` only if the session was torn down before a pump ran.
    pub report: Option<PumpReport>,
}

/// Entry point for relay connections.
pub struct RelayCoordinator {
    registry: Arc<SessionRegistry>,
    config: CoordinatorConfig,
}

impl RelayCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let registry = Arc::new(SessionRegistry::with_limit(config.max_sessions));
        Self::with_registry(registry, config)
    }

    pub fn with_registry(registry: Arc<SessionRegistry>, config: CoordinatorConfig) -> Self {
        Self { registry, config }
    }

    /// Access the underlying registry (e.g. for listing sessions).
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run one connection to completion.
    ///
    /// Returns once the relay has ended (both handlers of a session return
    /// after the pump finishes). On error the transport has already been
    /// closed with a reason matching the error.
    pub async fn handle_connection(
        &self,
        request: RelayRequest,
        transport: Box<dyn Transport>,
    ) -> RelayResult<ConnectionOutcome> {
        let session_id = request.session_id;
        let peer_id = request.peer_id;

        let session = match self.obtain_session(&request).await {
            Ok(session) => session,
            Err(e) => return Err(self.reject(session_id, transport, e).await),
        };

        if !session.validate_token(&request.access_token) {
            return Err(self
                .reject(session_id, transport, RelayError::TokenMismatch)
                .await);
        }

        let assigned = match request.role {
            Some(role) => session.assign_role(peer_id, role).await,
            None => session.assign_any_role(peer_id).await,
        };
        let role = match assigned {
            Ok(role) => role,
            Err(e) => return Err(self.reject(session_id, transport, e).await),
        };

        if let Err(rejected) = session.attach_transport(role, transport).await {
            return Err(self
                .reject(session_id, rejected.transport, rejected.error)
                .await);
        }
        session.signal_ready(role);

        if let Err(e) = session.wait_until_relayable(request.deadline).await {
            if matches!(e, RelayError::HandshakeTimeout) {
                warn!(session_id = %session_id, role = %role, "partner did not arrive in time");
                self.registry.remove_if_current(session_id, &session).await;
                session.dispose(e.close_reason()).await;
            } else {
                debug!(session_id = %session_id, role = %role, error = %e, "rendezvous aborted");
            }
            return Err(e);
        }

        let report = match session.begin_relay().await {
            Some((initiator, responder)) => {
                let pump = RelayPump::new(session_id).with_close_timeout(session.close_timeout());
                let report = pump.run(initiator, responder, session.closed()).await;
                session.finish(report.clone()).await;
                self.registry.remove_if_current(session_id, &session).await;
                session.dispose(CloseReason::SessionEnded).await;
                Some(report)
            }
            None => session.final_report().await,
        };

        Ok(ConnectionOutcome {
            session_id,
            role,
            peer_id,
            report,
        })
    }

    /// Remove and dispose every live session.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain().await;
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "disposing sessions for shutdown");
        let disposals = sessions.iter().map(|session| {
            session.dispose(CloseReason::TryAgain("Relay shutting down.".into()))
        });
        futures_util::future::join_all(disposals).await;
    }

    async fn obtain_session(&self, request: &RelayRequest) -> RelayResult<Arc<RelaySession>> {
        match (self.config.create_policy, request.role) {
            (CreatePolicy::InitiatorOnly, Some(Role::Responder)) => {
                self.await_existing(request.session_id, request.deadline).await
            }
            _ => {
                let id = request.session_id;
                let token = AccessToken::new(request.access_token.clone());
                let close_timeout = self.config.close_timeout;
                let (session, created) = self
                    .registry
                    .get_or_create(id, move || {
                        RelaySession::new(id, token).with_close_timeout(close_timeout)
                    })
                    .await?;
                if created {
                    debug!(session_id = %id, peer_id = %request.peer_id, "new session");
                }
                Ok(session)
            }
        }
    }

    async fn await_existing(
        &self,
        id: SessionId,
        deadline: Instant,
    ) -> RelayResult<Arc<RelaySession>> {
        loop {
            if let Some(session) = self.registry.try_get(id).await {
                return Ok(session);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RelayError::SessionNotFound(id.to_string()));
            }
            tokio::time::sleep_until(deadline.min(now + self.config.lookup_interval)).await;
        }
    }

    /// Close a transport we are not keeping and hand the error back.
    async fn reject(
        &self,
        session_id: SessionId,
        transport: Box<dyn Transport>,
        error: RelayError,
    ) -> RelayError {
        if error.is_protocol_violation() {
            warn!(session_id = %session_id, error = %error, "connection rejected");
        } else {
            info!(session_id = %session_id, error = %error, "connection refused");
        }
        match tokio::time::timeout(self.config.close_timeout, transport.close(error.close_reason()))
            .await
        {
            Ok(Err(e)) => debug!(session_id = %session_id, error = %e, "close after reject failed"),
            Err(_) => debug!(session_id = %session_id, "close after reject timed out"),
            Ok(Ok(())) => {}
        }
        error
    }
}
