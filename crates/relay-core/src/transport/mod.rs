//! Transport capability used by the relay.
//!
//! The pump only ever sees these traits. Each concrete transport (WebSocket,
//! raw byte stream, in-memory pair) implements them once.

use crate::error::RelayResult;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub mod memory;
pub mod stream;
pub mod websocket;

pub use memory::{CloseLog, MemoryTransport};
pub use stream::{StreamTransport, TcpTransport};
pub use websocket::WebSocketTransport;

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = RelayResult<T>> + Send + 'a>>;

/// Chunk size used when reading from raw byte streams.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// What kind of connection backs a transport (for logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Stream,
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Stream => "stream",
            TransportKind::Memory => "memory",
        })
    }
}

/// Why a transport is being closed.
///
/// WebSocket transports map this to a close frame code; byte streams just
/// shut down their write half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal end of a session (1000).
    SessionEnded,
    /// The peer broke the rendezvous protocol (1008).
    Rejected(String),
    /// The handshake could not complete; the peer may retry (1013).
    TryAgain(String),
}

impl CloseReason {
    pub fn message(&self) -> &str {
        match self {
            CloseReason::SessionEnded => "Session ended.",
            CloseReason::Rejected(msg) | CloseReason::TryAgain(msg) => msg,
        }
    }
}

/// Receiving half of a transport.
pub trait FrameReader: Send {
    /// Receive the next frame. `Ok(None)` means the source closed cleanly.
    /// A frame may be empty; the pump skips those.
    fn receive(&mut self) -> TransportFuture<'_, Option<Vec<u8>>>;
}

/// Sending half of a transport.
pub trait FrameWriter: Send {
    /// Send one frame verbatim.
    fn send<'a>(&'a mut self, data: &'a [u8]) -> TransportFuture<'a, ()>;

    /// Close the transport. Safe to call more than once.
    fn close(&mut self, reason: CloseReason) -> TransportFuture<'_, ()>;
}

/// A duplex frame transport.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Split into independently usable receive and send halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);

    /// Close the whole transport.
    fn close(self: Box<Self>, reason: CloseReason) -> TransportFuture<'static, ()> {
        let (_reader, mut writer) = self.split();
        Box::pin(async move { writer.close(reason).await })
    }
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport({})", self.kind())
    }
}
