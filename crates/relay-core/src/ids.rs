//! Typed identifiers for sessions and peers.
//!
//! Both are UUIDs on the wire. They are parsed and validated at the
//! boundary so the session state machine never sees malformed input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RelayError;

/// Registry key of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

/// Identifier chosen by a connecting caller (not by the session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl PeerId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<Uuid> for PeerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for SessionId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| RelayError::InvalidRequest(format!("session id is not a valid UUID: {s}")))
    }
}

impl FromStr for PeerId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| RelayError::InvalidRequest(format!("peer id is not a valid UUID: {s}")))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_id() {
        let id: SessionId = "6f1c2a4e-0a43-4c55-9f0e-5d7f1f0c9a11".parse().unwrap();
        assert_eq!(id.to_string(), "6f1c2a4e-0a43-4c55-9f0e-5d7f1f0c9a11");
    }

    #[test]
    fn reject_malformed_ids() {
        assert!("not-a-uuid".parse::<SessionId>().is_err());
        assert!("".parse::<PeerId>().is_err());
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(PeerId::new_random(), PeerId::new_random());
    }
}
