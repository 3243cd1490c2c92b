//! Role assignment: maps arriving peers to the two fixed session roles.
//!
//! First come, first served. A role is written at most once; a third
//! distinct peer is always rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RelayError, RelayResult};
use crate::ids::PeerId;

/// One of the two positions in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The side that requested the session (usually the viewer).
    Initiator,
    /// The side that answers it (usually the controlled device).
    Responder,
}

impl Role {
    /// Both roles, in the order roleless peers are assigned to them.
    pub const ALL: [Role; 2] = [Role::Initiator, Role::Responder];

    /// The other role in the session.
    pub fn partner(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RelayError;

    /// Accepts `initiator` (or its alias `requester`) and `responder`,
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("initiator") || s.eq_ignore_ascii_case("requester") {
            Ok(Role::Initiator)
        } else if s.eq_ignore_ascii_case("responder") {
            Ok(Role::Responder)
        } else {
            Err(RelayError::InvalidRequest(format!("unknown role: {s}")))
        }
    }
}

/// Role → peer mapping for a single session.
#[derive(Debug, Clone, Default)]
pub struct RoleAssignment {
    initiator: Option<PeerId>,
    responder: Option<PeerId>,
}

impl RoleAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `role` for `peer`.
    ///
    /// Claiming a role the same peer already holds succeeds. Claiming a role
    /// held by someone else, or claiming the partner role of a role the peer
    /// already holds, fails with [`RelayError::RoleConflict`].
    pub fn assign(&mut self, peer: PeerId, role: Role) -> RelayResult<Role> {
        if self.peer(role.partner()) == Some(peer) {
            return Err(RelayError::RoleConflict(role));
        }

        let slot = self.slot_mut(role);
        match *slot {
            None => {
                *slot = Some(peer);
                Ok(role)
            }
            Some(existing) if existing == peer => Ok(role),
            Some(_) => Err(RelayError::RoleConflict(role)),
        }
    }

    /// Claim whichever role is still free, initiator first.
    pub fn assign_any(&mut self, peer: PeerId) -> RelayResult<Role> {
        if let Some(role) = self.role_of(peer) {
            return Ok(role);
        }
        for role in Role::ALL {
            let slot = self.slot_mut(role);
            if slot.is_none() {
                *slot = Some(peer);
                return Ok(role);
            }
        }
        Err(RelayError::RoleConflict(Role::Responder))
    }

    /// Peer holding `role`, if claimed.
    pub fn peer(&self, role: Role) -> Option<PeerId> {
        match role {
            Role::Initiator => self.initiator,
            Role::Responder => self.responder,
        }
    }

    /// Role held by `peer`, if any.
    pub fn role_of(&self, peer: PeerId) -> Option<Role> {
        Role::ALL.into_iter().find(|role| self.peer(*role) == Some(peer))
    }

    /// Whether both roles are claimed.
    pub fn is_complete(&self) -> bool {
        self.initiator.is_some() && self.responder.is_some()
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<PeerId> {
        match role {
            Role::Initiator => &mut self.initiator,
            Role::Responder => &mut self.responder,
        }
    }
}
