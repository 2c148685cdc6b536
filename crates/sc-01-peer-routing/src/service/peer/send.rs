//! Outbound path.
//!
//! A failed or aborted send leaves the connection in an unknown state (the
//! write may still land), so every failure closes the peer.

use std::sync::Arc;

use sc_telemetry::{HistogramTimer, MESSAGES_SENT, SEND_DURATION, SEND_FAILURES};
use shared_types::Envelope;
use tracing::{trace, warn};

use super::Peer;
use crate::domain::{Context, PeerError};

impl Peer {
    /// Send `envelope` over the peer's connection.
    ///
    /// Waits for the peer to become Bound, then for the per-peer send lock,
    /// then for the write. The write runs on its own task and cannot be
    /// interrupted; if `ctx` ends or the peer closes first the caller gets an
    /// error while the write finishes in the background.
    ///
    /// Any error closes the peer.
    pub async fn send(&self, ctx: &Context, envelope: Envelope) -> Result<(), PeerError> {
        let _timer = HistogramTimer::new(&SEND_DURATION);
        let kind = envelope.kind();

        match self.send_inner(ctx, envelope).await {
            Ok(()) => {
                MESSAGES_SENT.inc();
                trace!(peer = %self.address, %kind, "Envelope sent");
                Ok(())
            }
            Err(e) => {
                SEND_FAILURES.with_label_values(&[e.reason()]).inc();
                warn!(peer = %self.address, %kind, error = %e, "Send failed, closing peer");
                // losing the race against another closer is fine
                let _ = self.close().await;
                Err(e)
            }
        }
    }

    async fn send_inner(&self, ctx: &Context, envelope: Envelope) -> Result<(), PeerError> {
        if let Some(err) = ctx.err() {
            return Err(PeerError::NotReady(err));
        }
        self.wait_ready(ctx).await?;

        let guard = tokio::select! {
            biased;
            err = ctx.done() => return Err(PeerError::Aborted(err)),
            _ = self.closer.closed() => return Err(PeerError::Closed),
            guard = Arc::clone(&self.send_lock).lock_owned() => guard,
        };

        let conn = match self.connection() {
            Some(conn) if !self.is_closed() => conn,
            _ => return Err(PeerError::Closed),
        };

        let write = tokio::spawn(async move {
            let _guard = guard;
            conn.send(envelope).await
        });

        tokio::select! {
            biased;
            joined = write => match joined {
                Ok(result) => result.map_err(PeerError::from),
                Err(e) => Err(PeerError::Task(e.to_string())),
            },
            _ = self.closer.closed() => Err(PeerError::Closed),
            err = ctx.done() => Err(PeerError::Aborted(err)),
        }
    }
}
