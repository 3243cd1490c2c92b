//! relay-core: rendezvous and relaying for two-party sessions.
//!
//! Two independent callers present the same session id and access token,
//! take the initiator and responder roles, attach their transports, signal
//! readiness, and are then bridged by a bidirectional frame pump until one
//! side goes away.

pub mod coordinator;
pub mod error;
pub mod ids;
pub mod latch;
pub mod pump;
pub mod registry;
pub mod role;
pub mod session;
pub mod token;
pub mod transport;

// Re-export commonly used items at crate root.
pub use coordinator::{
    ConnectionOutcome, CoordinatorConfig, CreatePolicy, RelayCoordinator, RelayRequest,
};
pub use error::{RelayError, RelayResult};
pub use ids::{PeerId, SessionId};
pub use latch::Latch;
pub use pump::{Direction, DirectionStats, PumpEnd, PumpReport, RelayPump};
pub use registry::SessionRegistry;
pub use role::{Role, RoleAssignment};
pub use session::{RejectedTransport, RelaySession, SessionPhase, SessionSummary};
pub use token::AccessToken;
pub use transport::{CloseReason, Transport, TransportKind};
