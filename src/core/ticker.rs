//! Waiting and cancellation primitives for the polling loop.
//!
//! The pipeline never sleeps directly; it waits through a [`Ticker`] so tests
//! can substitute one that returns immediately.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

/// Source of delays between status checks
#[async_trait]
pub trait Ticker: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Real-time ticker backed by `tokio::time::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Cooperative cancellation for a run.
///
/// Clones share state; cancelling any clone cancels them all. The pipeline
/// checks it between stages and races it against every poll wait.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: std::sync::Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: std::sync::Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone, so this only ends on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}
