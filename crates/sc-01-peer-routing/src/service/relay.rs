//! # Relay
//!
//! A consumer that is also a producer: everything it receives is
//! republished through its own subscription registry, keeping the original
//! origin peer. Used to build routing pipelines, e.g. one relay per channel
//! that several protocol routines subscribe to.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use shared_types::Envelope;
use tracing::{debug, trace};

use crate::domain::{CloseHook, Closer, ConsumerId, HookKey, Predicate, RelayError};
use crate::service::{Consumer, Peer, Subscriptions};

/// Pass-through fan-out node.
pub struct Relay {
    id: ConsumerId,
    subscriptions: Subscriptions<ConsumerId>,
    closer: Closer,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("id", &self.id)
            .field("subscribers", &self.subscriptions.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Relay {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let id = ConsumerId::new();
        Arc::new(Self {
            id,
            subscriptions: Subscriptions::new(id),
            closer: Closer::new(),
        })
    }

    /// Forward envelopes matching `predicate` to `consumer`.
    ///
    /// # Panics
    ///
    /// If `consumer` is already subscribed to this relay.
    pub fn subscribe(
        &self,
        consumer: Arc<dyn Consumer>,
        predicate: Predicate,
    ) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        self.subscriptions.add(predicate, consumer)?;
        Ok(())
    }

    /// Stop forwarding to `consumer`. A no-op once the relay is closed.
    ///
    /// # Panics
    ///
    /// If the relay is open and `consumer` is not subscribed.
    pub fn unsubscribe(&self, consumer: ConsumerId) {
        self.subscriptions.delete(consumer);
    }

    /// Leave every upstream producer and drop every downstream consumer.
    ///
    /// A second call fails with [`RelayError::AlreadyClosed`].
    pub fn close(&self) -> Result<(), RelayError> {
        self.closer.close().map_err(|_| RelayError::AlreadyClosed)?;
        let dropped = self.subscriptions.close().unwrap_or(0);
        debug!(relay = %self.id, dropped, "Relay closed");
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[async_trait]
impl Consumer for Relay {
    fn id(&self) -> ConsumerId {
        self.id
    }

    async fn put(&self, origin: &Arc<Peer>, envelope: Envelope) {
        if self.subscriptions.produce(&envelope, origin).await == 0 {
            trace!(
                relay = %self.id,
                peer = %origin.address(),
                kind = %envelope.kind(),
                "No relay subscriber matched, envelope dropped"
            );
        }
    }

    fn on_close(&self, hook: CloseHook) -> Option<HookKey> {
        self.closer.on_close_keyed(hook)
    }

    fn remove_close_hook(&self, key: HookKey) {
        self.closer.remove_hook(key);
    }
}
