//! Inbound path: one receive loop per peer.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use sc_telemetry::{MESSAGES_RECEIVED, UNHANDLED_MESSAGES};
use tracing::{debug, trace};

use super::Peer;

impl Peer {
    /// Start the receive loop unless it already runs.
    ///
    /// The loop waits for the peer to become Bound, then republishes every
    /// inbound envelope to the peer's subscribers in arrival order. Envelopes
    /// nobody subscribed to go to the default handler. A read error closes
    /// the peer and ends the loop. Returns whether this call started it.
    pub fn spawn_receive_loop(self: &Arc<Self>) -> bool {
        if self.receiving.swap(true, Ordering::AcqRel) {
            return false;
        }
        tokio::spawn(Arc::clone(self).receive_loop());
        true
    }

    async fn receive_loop(self: Arc<Self>) {
        tokio::select! {
            biased;
            _ = self.closer.closed() => return,
            _ = self.bound.cancelled() => {}
        }
        let Some(conn) = self.connection() else {
            return;
        };
        debug!(peer = %self.address, "Receive loop started");

        loop {
            let received = tokio::select! {
                biased;
                _ = self.closer.closed() => break,
                received = conn.recv() => received,
            };

            let envelope = match received {
                Ok(envelope) => envelope,
                Err(e) => {
                    if self.close().await.is_ok() {
                        debug!(peer = %self.address, error = %e, "Receive failed, peer closed");
                    }
                    break;
                }
            };

            MESSAGES_RECEIVED.inc();
            trace!(peer = %self.address, kind = %envelope.kind(), "Envelope received");

            if self.subscriptions.produce(&envelope, &self).await == 0 {
                UNHANDLED_MESSAGES.inc();
                let handler = self.default_handler.read().clone();
                handler(&self, &envelope);
            }
        }
        debug!(peer = %self.address, "Receive loop stopped");
    }
}
