//! Bidirectional relay pump.
//!
//! Two forwarding loops run concurrently inside one task:
//! - **Initiator→Responder**: receive from the initiator, send to the responder.
//! - **Responder→Initiator**: the reverse.
//!
//! Each loop is receive-then-send, so a slow destination throttles its own
//! source and nothing queues in between. The first loop to finish (clean
//! close, error, or cancellation) ends the pump; the other loop is dropped and
//! both transports are closed.

use crate::error::RelayError;
use crate::ids::SessionId;
use crate::transport::{CloseReason, FrameReader, FrameWriter, Transport};
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on closing both transports once the pump ends.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Direction of one forwarding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    InitiatorToResponder,
    ResponderToInitiator,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::InitiatorToResponder => "initiator->responder",
            Direction::ResponderToInitiator => "responder->initiator",
        })
    }
}

/// Why the pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEnd {
    /// The source of this direction closed (or its destination went away).
    Closed(Direction),
    /// This direction hit an unexpected transport error.
    Failed(Direction, String),
    /// The session was torn down from outside.
    Cancelled,
}

/// Traffic forwarded in one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionStats {
    pub bytes: u64,
    pub frames: u64,
}

/// Summary of a finished relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub initiator_to_responder: DirectionStats,
    pub responder_to_initiator: DirectionStats,
    pub end: PumpEnd,
    pub duration: Duration,
}

impl PumpReport {
    pub fn bytes_forwarded(&self) -> u64 {
        self.initiator_to_responder.bytes + self.responder_to_initiator.bytes
    }

    /// Whether anything made it across. Callers use this to tell "the
    /// session ended" apart from "the session never really started".
    pub fn any_forwarded(&self) -> bool {
        self.initiator_to_responder.frames > 0 || self.responder_to_initiator.frames > 0
    }
}

/// Relays frames between the two transports of one session.
pub struct RelayPump {
    session_id: SessionId,
    close_timeout: Duration,
}

impl RelayPump {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Run until either direction ends or `cancel` resolves.
    ///
    /// There is no overall timeout: relays live as long as both peers do.
    pub async fn run<F>(
        &self,
        initiator: Box<dyn Transport>,
        responder: Box<dyn Transport>,
        cancel: F,
    ) -> PumpReport
    where
        F: Future<Output = ()> + Send,
    {
        let started = Instant::now();
        info!(
            session_id = %self.session_id,
            initiator = %initiator.kind(),
            responder = %responder.kind(),
            "relay started"
        );

        let (mut initiator_rx, mut initiator_tx) = initiator.split();
        let (mut responder_rx, mut responder_tx) = responder.split();
        let mut up = DirectionStats::default();
        let mut down = DirectionStats::default();

        let end = {
            let forward_up = forward(
                self.session_id,
                Direction::InitiatorToResponder,
                &mut *initiator_rx,
                &mut *responder_tx,
                &mut up,
            );
            let forward_down = forward(
                self.session_id,
                Direction::ResponderToInitiator,
                &mut *responder_rx,
                &mut *initiator_tx,
                &mut down,
            );

            tokio::select! {
                end = forward_up => end,
                end = forward_down => end,
                _ = cancel => {
                    debug!(session_id = %self.session_id, "relay cancelled");
                    PumpEnd::Cancelled
                }
            }
        };

        let close_both = async {
            let (a, b) = tokio::join!(
                initiator_tx.close(CloseReason::SessionEnded),
                responder_tx.close(CloseReason::SessionEnded),
            );
            for result in [a, b] {
                if let Err(e) = result {
                    debug!(session_id = %self.session_id, error = %e, "transport close failed");
                }
            }
        };
        if tokio::time::timeout(self.close_timeout, close_both).await.is_err() {
            warn!(session_id = %self.session_id, "graceful close timed out, dropping transports");
        }

        let report = PumpReport {
            initiator_to_responder: up,
            responder_to_initiator: down,
            end,
            duration: started.elapsed(),
        };
        info!(
            session_id = %self.session_id,
            up_bytes = report.initiator_to_responder.bytes,
            down_bytes = report.responder_to_initiator.bytes,
            end = ?report.end,
            "relay finished"
        );
        report
    }
}

/// One forwarding loop. Returns how it ended; never panics on I/O.
async fn forward(
    session_id: SessionId,
    direction: Direction,
    reader: &mut dyn FrameReader,
    writer: &mut dyn FrameWriter,
    stats: &mut DirectionStats,
) -> PumpEnd {
    loop {
        let frame = match reader.receive().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(session_id = %session_id, direction = %direction, "source closed");
                return PumpEnd::Closed(direction);
            }
            Err(e) => return end_on_error(session_id, direction, e),
        };

        if frame.is_empty() {
            continue;
        }

        if let Err(e) = writer.send(&frame).await {
            return end_on_error(session_id, direction, e);
        }
        stats.bytes += frame.len() as u64;
        stats.frames += 1;
    }
}

/// Peer resets and close frames are normal ends; anything else is logged loudly.
fn end_on_error(session_id: SessionId, direction: Direction, error: RelayError) -> PumpEnd {
    if is_disconnect(&error) {
        debug!(session_id = %session_id, direction = %direction, error = %error, "peer disconnected");
        PumpEnd::Closed(direction)
    } else {
        warn!(session_id = %session_id, direction = %direction, error = %error, "relay direction failed");
        PumpEnd::Failed(direction, error.to_string())
    }
}

fn is_disconnect(error: &RelayError) -> bool {
    match error {
        RelayError::TransportClosed => true,
        RelayError::Io(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
