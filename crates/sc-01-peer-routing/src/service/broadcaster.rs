//! # Broadcaster
//!
//! Sends one envelope to a fixed set of peers concurrently and reports every
//! peer that failed. No ordering is guaranteed across the peers.

use std::sync::Arc;

use futures::future::join_all;
use shared_types::Envelope;
use tracing::debug;

use crate::domain::{BroadcastError, Context};
use crate::service::Peer;

/// Fan-out sender over a fixed peer list.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    peers: Vec<Arc<Peer>>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(peers: Vec<Arc<Peer>>) -> Self {
        Self { peers }
    }

    #[must_use]
    pub fn peers(&self) -> &[Arc<Peer>] {
        &self.peers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Send `envelope` to every peer, waiting for all sends to finish.
    ///
    /// Each send is bounded by `ctx`. Failed peers are closed by their own
    /// send path and listed in the error by their index in
    /// [`peers`](Self::peers).
    pub async fn send(&self, ctx: &Context, envelope: Envelope) -> Result<(), BroadcastError> {
        let sends = self.peers.iter().map(|peer| {
            let envelope = envelope.clone();
            async move { peer.send(ctx, envelope).await }
        });
        let results = join_all(sends).await;

        let failures: Vec<_> = results
            .into_iter()
            .enumerate()
            .filter_map(|(idx, result)| result.err().map(|e| (idx, e)))
            .collect();

        if failures.is_empty() {
            return Ok(());
        }
        debug!(
            failed = failures.len(),
            total = self.peers.len(),
            "Broadcast partially failed"
        );
        Err(BroadcastError { failures })
    }
}
