//! One-shot broadcast latch.
//!
//! Settable exactly once, awaitable by any number of tasks. Backed by a
//! `watch` channel so late waiters observe the settled state immediately.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Settle the latch. Returns `false` if it was already settled.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|settled| {
            if *settled {
                false
            } else {
                *settled = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is settled.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a
        // dropped channel while borrowed.
        let _ = rx.wait_for(|settled| *settled).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
