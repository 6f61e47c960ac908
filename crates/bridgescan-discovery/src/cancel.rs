/*!
 * Cooperative cancellation for scan rounds.
 */
use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable cancellation flag shared by everything taking part in a scan
///
/// Cancelling never interrupts running work; participants observe the flag
/// through their listener and wind down on their own.
#[derive(Debug, Clone)]
pub struct ScanCancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl ScanCancellation {
    /// Create an uncancelled token
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancel the token and every clone of it
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone, so this only returns on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for ScanCancellation {
    fn default() -> Self {
        Self::new()
    }
}
