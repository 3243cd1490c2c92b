//! In-memory frame transport.
//!
//! [`MemoryTransport::pair`] returns two connected ends: frames sent on one
//! are received on the other, in order and unmodified. Used by tests and by
//! embedders that relay between in-process producers.

use super::{CloseReason, FrameReader, FrameWriter, Transport, TransportFuture, TransportKind};
use crate::error::RelayError;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Frames buffered per direction before senders wait.
const CHANNEL_CAPACITY: usize = 64;

/// Shared record of the close reasons a transport end saw.
#[derive(Debug, Clone, Default)]
pub struct CloseLog(Arc<Mutex<Vec<CloseReason>>>);

impl CloseLog {
    pub async fn reasons(&self) -> Vec<CloseReason> {
        self.0.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.0.lock().await.len()
    }
}

/// One end of an in-memory duplex connection.
pub struct MemoryTransport {
    rx: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<Vec<u8>>,
    closes: CloseLog,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            MemoryTransport {
                rx: a_rx,
                tx: a_tx,
                closes: CloseLog::default(),
            },
            MemoryTransport {
                rx: b_rx,
                tx: b_tx,
                closes: CloseLog::default(),
            },
        )
    }

    /// Handle for observing how often (and why) this end was closed.
    pub fn close_log(&self) -> CloseLog {
        self.closes.clone()
    }
}

struct MemoryReader {
    rx: mpsc::Receiver<Vec<u8>>,
}

struct MemoryWriter {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    closes: CloseLog,
}

impl FrameReader for MemoryReader {
    fn receive(&mut self) -> TransportFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}

impl FrameWriter for MemoryWriter {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let tx = self.tx.as_ref().ok_or(RelayError::TransportClosed)?;
            tx.send(data.to_vec())
                .await
                .map_err(|_| RelayError::TransportClosed)
        })
    }

    fn close(&mut self, reason: CloseReason) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            // Dropping the sender is what the other end observes as EOF.
            if self.tx.take().is_some() {
                self.closes.0.lock().await.push(reason);
            }
            Ok(())
        })
    }
}

impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let this = *self;
        (
            Box::new(MemoryReader { rx: this.rx }),
            Box::new(MemoryWriter {
                tx: Some(this.tx),
                closes: this.closes,
            }),
        )
    }
}
