//! Per-session rendezvous state.
//!
//! A [`RelaySession`] tracks who holds which role, the transport attached
//! for each role, and one ready latch per role. All mutation goes through the
//! session's own lock; waiting goes through latches so any number of tasks
//! can observe a settled state without holding the lock.

use crate::error::{RelayError, RelayResult};
use crate::ids::{PeerId, SessionId};
use crate::latch::Latch;
use crate::pump::{PumpReport, DEFAULT_CLOSE_TIMEOUT};
use crate::role::{Role, RoleAssignment};
use crate::token::AccessToken;
use crate::transport::{CloseReason, Transport, TransportKind};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Observable lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No transport attached yet.
    Created,
    /// One side has attached.
    AwaitingPeerAttach,
    /// Both sides attached, readiness pending.
    AwaitingBothReady,
    /// A pump owns both transports.
    Relaying,
    /// Disposed after a normal end.
    Closed,
    /// Disposed after a timeout or error.
    Faulted,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::Created => "created",
            SessionPhase::AwaitingPeerAttach => "awaiting_peer_attach",
            SessionPhase::AwaitingBothReady => "awaiting_both_ready",
            SessionPhase::Relaying => "relaying",
            SessionPhase::Closed => "closed",
            SessionPhase::Faulted => "faulted",
        })
    }
}

/// Snapshot of a session for listing and logs.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub phase: SessionPhase,
    pub age: Duration,
    pub initiator_assigned: bool,
    pub responder_assigned: bool,
}

/// A transport the session refused, handed back so the caller can close it.
pub struct RejectedTransport {
    pub error: RelayError,
    pub transport: Box<dyn Transport>,
}

impl fmt::Debug for RejectedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectedTransport")
            .field("error", &self.error)
            .field("transport", &self.transport)
            .finish()
    }
}

/// One transport slot. `Released` remembers the kind after the pump took it,
/// so the slot still counts as attached.
enum Slot {
    Empty,
    Attached(Box<dyn Transport>),
    Released(TransportKind),
}

impl Slot {
    fn kind(&self) -> Option<TransportKind> {
        match self {
            Slot::Empty => None,
            Slot::Attached(t) => Some(t.kind()),
            Slot::Released(kind) => Some(*kind),
        }
    }

    fn is_attached(&self) -> bool {
        !matches!(self, Slot::Empty)
    }
}

struct SessionState {
    roles: RoleAssignment,
    initiator: Slot,
    responder: Slot,
    relaying: bool,
    ended: Option<SessionPhase>,
    report: Option<PumpReport>,
}

impl SessionState {
    fn slot(&self, role: Role) -> &Slot {
        match role {
            Role::Initiator => &self.initiator,
            Role::Responder => &self.responder,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Slot {
        match role {
            Role::Initiator => &mut self.initiator,
            Role::Responder => &mut self.responder,
        }
    }

    fn phase(&self) -> SessionPhase {
        if let Some(ended) = self.ended {
            return ended;
        }
        if self.relaying {
            return SessionPhase::Relaying;
        }
        match (self.initiator.is_attached(), self.responder.is_attached()) {
            (false, false) => SessionPhase::Created,
            (true, true) => SessionPhase::AwaitingBothReady,
            _ => SessionPhase::AwaitingPeerAttach,
        }
    }
}

/// Per-role pair of latches.
#[derive(Default)]
struct RoleLatches {
    initiator: Latch,
    responder: Latch,
}

impl RoleLatches {
    fn get(&self, role: Role) -> &Latch {
        match role {
            Role::Initiator => &self.initiator,
            Role::Responder => &self.responder,
        }
    }

    async fn wait_both(&self) {
        self.initiator.wait().await;
        self.responder.wait().await;
    }
}

/// Rendezvous state for one relay session.
pub struct RelaySession {
    id: SessionId,
    access_token: AccessToken,
    created_at: Instant,
    close_timeout: Duration,
    state: Mutex<SessionState>,
    ready: RoleLatches,
    attached: RoleLatches,
    closed: Latch,
    finished: Latch,
}

impl RelaySession {
    pub fn new(id: SessionId, access_token: AccessToken) -> Self {
        Self {
            id,
            access_token,
            created_at: Instant::now(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            state: Mutex::new(SessionState {
                roles: RoleAssignment::new(),
                initiator: Slot::Empty,
                responder: Slot::Empty,
                relaying: false,
                ended: None,
                report: None,
            }),
            ready: RoleLatches::default(),
            attached: RoleLatches::default(),
            closed: Latch::new(),
            finished: Latch::new(),
        }
    }

    /// Bound on the graceful close of leftover transports during disposal.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase()
    }

    pub async fn summary(&self) -> SessionSummary {
        let state = self.state.lock().await;
        SessionSummary {
            id: self.id,
            phase: state.phase(),
            age: self.created_at.elapsed(),
            initiator_assigned: state.roles.peer(Role::Initiator).is_some(),
            responder_assigned: state.roles.peer(Role::Responder).is_some(),
        }
    }

    /// Constant-time comparison against the session's access token.
    pub fn validate_token(&self, presented: &str) -> bool {
        self.access_token.matches(presented)
    }

    /// Claim `role` for `peer`. See [`RoleAssignment::assign`].
    pub async fn assign_role(&self, peer: PeerId, role: Role) -> RelayResult<Role> {
        let mut state = self.state.lock().await;
        if state.ended.is_some() {
            return Err(RelayError::SessionClosed);
        }
        let role = state.roles.assign(peer, role)?;
        debug!(session_id = %self.id, peer_id = %peer, role = %role, "role assigned");
        Ok(role)
    }

    /// Claim whichever role is free for a caller that did not name one.
    pub async fn assign_any_role(&self, peer: PeerId) -> RelayResult<Role> {
        let mut state = self.state.lock().await;
        if state.ended.is_some() {
            return Err(RelayError::SessionClosed);
        }
        let role = state.roles.assign_any(peer)?;
        debug!(session_id = %self.id, peer_id = %peer, role = %role, "role assigned");
        Ok(role)
    }

    /// Attach the transport for `role`. Each slot is set at most once; a
    /// refused transport is handed back inside the error.
    pub async fn attach_transport(
        &self,
        role: Role,
        transport: Box<dyn Transport>,
    ) -> Result<(), RejectedTransport> {
        let mut state = self.state.lock().await;
        if state.ended.is_some() {
            return Err(RejectedTransport {
                error: RelayError::SessionClosed,
                transport,
            });
        }
        let slot = state.slot_mut(role);
        if slot.is_attached() {
            return Err(RejectedTransport {
                error: RelayError::TransportAlreadyAttached(role),
                transport,
            });
        }
        debug!(session_id = %self.id, role = %role, kind = %transport.kind(), "transport attached");
        *slot = Slot::Attached(transport);
        self.attached.get(role).set();
        Ok(())
    }

    /// Settle the ready latch for `role`. Returns `false` if it was already
    /// settled or the session is closed.
    pub fn signal_ready(&self, role: Role) -> bool {
        if self.closed.is_set() {
            return false;
        }
        let settled = self.ready.get(role).set();
        if settled {
            debug!(session_id = %self.id, role = %role, "ready");
        }
        settled
    }

    /// Wait until both roles signalled ready.
    pub async fn wait_for_partner(&self, deadline: Instant) -> RelayResult<()> {
        self.wait_or_close(self.ready.wait_both(), deadline).await
    }

    /// Wait until both transport slots are set.
    pub async fn wait_for_both_transports_attached(&self, deadline: Instant) -> RelayResult<()> {
        self.wait_or_close(self.attached.wait_both(), deadline).await
    }

    /// Both waits under one deadline.
    pub async fn wait_until_relayable(&self, deadline: Instant) -> RelayResult<()> {
        let both = async {
            self.attached.wait_both().await;
            self.ready.wait_both().await;
        };
        self.wait_or_close(both, deadline).await
    }

    async fn wait_or_close<F>(&self, fut: F, deadline: Instant) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = self.closed.wait() => Err(RelayError::SessionClosed),
            res = tokio::time::timeout_at(deadline, fut) => res.map_err(|_| RelayError::HandshakeTimeout),
        }
    }

    /// Role and transport kind of `peer`'s own slot.
    pub async fn caller_transport_role(&self, peer: PeerId) -> RelayResult<(Role, TransportKind)> {
        let state = self.state.lock().await;
        let role = state
            .roles
            .role_of(peer)
            .ok_or_else(|| RelayError::PeerNotRecognized(peer.to_string()))?;
        let kind = state
            .slot(role)
            .kind()
            .ok_or(RelayError::PartnerTransportNotAttached(role))?;
        Ok((role, kind))
    }

    /// Role and transport kind of the slot opposite `peer`.
    pub async fn partner_transport_role(&self, peer: PeerId) -> RelayResult<(Role, TransportKind)> {
        let state = self.state.lock().await;
        let role = state
            .roles
            .role_of(peer)
            .ok_or_else(|| RelayError::PeerNotRecognized(peer.to_string()))?
            .partner();
        let kind = state
            .slot(role)
            .kind()
            .ok_or(RelayError::PartnerTransportNotAttached(role))?;
        Ok((role, kind))
    }

    /// Take both transports for the pump, initiator first.
    ///
    /// Exactly one caller wins; everyone else (and any call before both
    /// slots are filled or after disposal) gets `None`.
    pub async fn begin_relay(&self) -> Option<(Box<dyn Transport>, Box<dyn Transport>)> {
        let mut state = self.state.lock().await;
        if state.ended.is_some() || state.relaying {
            return None;
        }
        if !matches!(
            (&state.initiator, &state.responder),
            (Slot::Attached(_), Slot::Attached(_))
        ) {
            return None;
        }

        let initiator = take_attached(&mut state.initiator)?;
        let responder = take_attached(&mut state.responder)?;
        state.relaying = true;
        Some((initiator, responder))
    }

    /// Record the pump's report.
    pub async fn finish(&self, report: PumpReport) {
        self.state.lock().await.report = Some(report);
        self.finished.set();
    }

    pub async fn report(&self) -> Option<PumpReport> {
        self.state.lock().await.report.clone()
    }

    /// Wait for the session to close and return the pump's report.
    ///
    /// If a pump was started, this also waits for it to record its report,
    /// which may happen after disposal. `None` means no pump ever ran.
    pub async fn final_report(&self) -> Option<PumpReport> {
        self.closed.wait().await;
        let relaying = self.state.lock().await.relaying;
        if relaying {
            self.finished.wait().await;
        }
        self.report().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }

    /// Resolves once the session is disposed.
    pub async fn closed(&self) {
        self.closed.wait().await
    }

    /// Tear the session down. Idempotent: only the first call does anything
    /// and returns `true`.
    ///
    /// Waiters fail with [`RelayError::SessionClosed`]. Transports still held
    /// by the session are closed with `reason`, bounded by the close timeout,
    /// then dropped. A running pump observes the closed latch and closes its
    /// own transports; disposal waits for it to report, under the same bound.
    pub async fn dispose(&self, reason: CloseReason) -> bool {
        let (leftovers, relaying) = {
            let mut state = self.state.lock().await;
            if state.ended.is_some() {
                return false;
            }
            state.ended = Some(match reason {
                CloseReason::SessionEnded => SessionPhase::Closed,
                _ => SessionPhase::Faulted,
            });
            self.closed.set();

            let mut leftovers = Vec::new();
            for role in Role::ALL {
                if let Some(transport) = take_attached(state.slot_mut(role)) {
                    leftovers.push((role, transport));
                }
            }
            (leftovers, state.relaying)
        };

        let deadline = Instant::now() + self.close_timeout;
        let closes = leftovers.into_iter().map(|(role, transport)| {
            let reason = reason.clone();
            async move {
                match tokio::time::timeout_at(deadline, transport.close(reason)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(session_id = %self.id, role = %role, error = %e, "transport close failed")
                    }
                    Err(_) => {
                        warn!(session_id = %self.id, role = %role, "graceful close timed out, dropping transport")
                    }
                }
            }
        });
        let pump_done = async {
            if relaying && tokio::time::timeout_at(deadline, self.finished.wait()).await.is_err() {
                warn!(session_id = %self.id, "relay did not wind down before the close timeout");
            }
        };
        tokio::join!(futures_util::future::join_all(closes), pump_done);

        info!(session_id = %self.id, reason = reason.message(), "session disposed");
        true
    }
}

fn take_attached(slot: &mut Slot) -> Option<Box<dyn Transport>> {
    let kind = slot.kind()?;
    match std::mem::replace(slot, Slot::Released(kind)) {
        Slot::Attached(transport) => Some(transport),
        other => {
            *slot = other;
            None
        }
    }
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("closed", &self.closed.is_set())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::sync::Arc;

    fn session() -> RelaySession {
        RelaySession::new(SessionId::new_random(), AccessToken::new("secret"))
    }

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn phases_follow_attachment() {
        let s = session().with_close_timeout(Duration::from_millis(50));
        assert_eq!(s.phase().await, SessionPhase::Created);

        let (a, _a_peer) = MemoryTransport::pair();
        s.attach_transport(Role::Initiator, Box::new(a)).await.unwrap();
        assert_eq!(s.phase().await, SessionPhase::AwaitingPeerAttach);

        let (b, _b_peer) = MemoryTransport::pair();
        s.attach_transport(Role::Responder, Box::new(b)).await.unwrap();
        assert_eq!(s.phase().await, SessionPhase::AwaitingBothReady);

        assert!(s.begin_relay().await.is_some());
        assert_eq!(s.phase().await, SessionPhase::Relaying);

        s.dispose(CloseReason::SessionEnded).await;
        assert_eq!(s.phase().await, SessionPhase::Closed);
    }

    #[tokio::test]
    async fn second_attach_is_rejected_and_handed_back() {
        let s = session();
        let (a, _a_peer) = MemoryTransport::pair();
        let (b, _b_peer) = MemoryTransport::pair();
        s.attach_transport(Role::Initiator, Box::new(a)).await.unwrap();

        let rejected = s
            .attach_transport(Role::Initiator, Box::new(b))
            .await
            .unwrap_err();
        assert!(matches!(
            rejected.error,
            RelayError::TransportAlreadyAttached(Role::Initiator)
        ));
        assert_eq!(rejected.transport.kind(), TransportKind::Memory);
    }

    #[tokio::test]
    async fn attach_after_dispose_fails() {
        let s = session();
        s.dispose(CloseReason::SessionEnded).await;
        let (a, _a_peer) = MemoryTransport::pair();
        let rejected = s
            .attach_transport(Role::Responder, Box::new(a))
            .await
            .unwrap_err();
        assert!(matches!(rejected.error, RelayError::SessionClosed));
    }

    #[tokio::test]
    async fn double_ready_does_not_satisfy_partner_wait() {
        let s = session();
        assert!(s.signal_ready(Role::Initiator));
        assert!(!s.signal_ready(Role::Initiator));
        assert!(matches!(
            s.wait_for_partner(soon(50)).await,
            Err(RelayError::HandshakeTimeout)
        ));

        assert!(s.signal_ready(Role::Responder));
        s.wait_for_partner(soon(50)).await.unwrap();
    }

    #[tokio::test]
    async fn dispose_wakes_waiters_with_session_closed() {
        let s = Arc::new(session());
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait_until_relayable(soon(5_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(s.dispose(CloseReason::TryAgain("shutting down".into())).await);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(RelayError::SessionClosed)
        ));
        assert_eq!(s.phase().await, SessionPhase::Faulted);
        assert!(!s.signal_ready(Role::Initiator));
    }

    #[tokio::test]
    async fn transport_roles_resolve_by_peer() {
        let s = session();
        let alice = PeerId::new_random();
        let bob = PeerId::new_random();
        s.assign_role(alice, Role::Initiator).await.unwrap();

        assert!(matches!(
            s.caller_transport_role(bob).await,
            Err(RelayError::PeerNotRecognized(_))
        ));
        assert!(matches!(
            s.partner_transport_role(alice).await,
            Err(RelayError::PartnerTransportNotAttached(Role::Responder))
        ));

        s.assign_role(bob, Role::Responder).await.unwrap();
        let (b, _b_peer) = MemoryTransport::pair();
        s.attach_transport(Role::Responder, Box::new(b)).await.unwrap();
        assert_eq!(
            s.partner_transport_role(alice).await.unwrap(),
            (Role::Responder, TransportKind::Memory)
        );
        assert_eq!(
            s.caller_transport_role(bob).await.unwrap(),
            (Role::Responder, TransportKind::Memory)
        );
    }

    #[tokio::test]
    async fn begin_relay_has_one_winner() {
        let s = session();
        let (a, _a_peer) = MemoryTransport::pair();
        let (b, _b_peer) = MemoryTransport::pair();
        assert!(s.begin_relay().await.is_none());
        s.attach_transport(Role::Initiator, Box::new(a)).await.unwrap();
        s.attach_transport(Role::Responder, Box::new(b)).await.unwrap();

        let (first, second) = tokio::join!(s.begin_relay(), s.begin_relay());
        assert!(first.is_some() ^ second.is_some());
    }

    #[tokio::test]
    async fn concurrent_attach_for_one_role_has_one_winner() {
        let s = Arc::new(session());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                let (t, _peer) = MemoryTransport::pair();
                s.attach_transport(Role::Responder, Box::new(t)).await
            }));
        }

        let mut attached = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(()) => attached += 1,
                Err(rejected) => assert!(matches!(
                    rejected.error,
                    RelayError::TransportAlreadyAttached(Role::Responder)
                )),
            }
        }
        assert_eq!(attached, 1);
        assert_eq!(s.phase().await, SessionPhase::AwaitingPeerAttach);
    }

    #[tokio::test]
    async fn concurrent_dispose_closes_everything_once() {
        let s = Arc::new(session());
        let (a, _a_peer) = MemoryTransport::pair();
        let (b, _b_peer) = MemoryTransport::pair();
        let a_log = a.close_log();
        let b_log = b.close_log();
        s.attach_transport(Role::Initiator, Box::new(a)).await.unwrap();
        s.attach_transport(Role::Responder, Box::new(b)).await.unwrap();

        // Only the initiator is ready, so this waiter stays blocked.
        s.signal_ready(Role::Initiator);
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait_until_relayable(soon(5_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                s.dispose(CloseReason::SessionEnded).await
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(a_log.reasons().await, vec![CloseReason::SessionEnded]);
        assert_eq!(b_log.reasons().await, vec![CloseReason::SessionEnded]);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(RelayError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn dispose_waits_for_running_relay_to_report() {
        let s = Arc::new(session().with_close_timeout(Duration::from_secs(2)));
        let (a, _a_peer) = MemoryTransport::pair();
        let (b, _b_peer) = MemoryTransport::pair();
        let a_log = a.close_log();
        let b_log = b.close_log();
        s.attach_transport(Role::Initiator, Box::new(a)).await.unwrap();
        s.attach_transport(Role::Responder, Box::new(b)).await.unwrap();
        let (initiator, responder) = s.begin_relay().await.unwrap();

        let relay = {
            let s = s.clone();
            tokio::spawn(async move {
                let report = crate::pump::RelayPump::new(s.id())
                    .run(initiator, responder, s.closed())
                    .await;
                s.finish(report).await;
            })
        };

        assert!(s.dispose(CloseReason::TryAgain("shutting down".into())).await);
        assert_eq!(a_log.count().await, 1);
        assert_eq!(b_log.count().await, 1);
        assert!(s.report().await.is_some());
        relay.await.unwrap();
    }
}
