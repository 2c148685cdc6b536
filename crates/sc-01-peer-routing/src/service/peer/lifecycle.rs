//! Peer state and lifecycle: binding a connection, closing, subscriptions.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sc_telemetry::PEERS_ACTIVE;
use shared_types::Address;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::fault::invariant_violation;
use crate::domain::{
    CloseHook, Closer, ConnectionError, ConsumerId, Context, HookKey, PeerError, Predicate,
};
use crate::ports::Connection;
use crate::service::{log_and_drop, Consumer, DefaultMsgHandler, Subscriptions};

/// Outcome of offering a connection to a peer.
pub(crate) enum Bind {
    /// The connection is now the peer's.
    Installed,
    /// The peer already had a connection; this one is handed back.
    Redundant(Arc<dyn Connection>),
    /// The peer is closed; this one is handed back.
    Closed(Arc<dyn Connection>),
}

/// One authenticated logical connection to a remote participant.
///
/// Starts Unbound, becomes Bound on the first successful
/// [`create`](Self::create) and ends Closed. Both transitions are one-shot.
pub struct Peer {
    pub(super) address: Address,
    /// Guarded by a plain mutex; taken out once on close.
    pub(super) slot: Mutex<Option<Arc<dyn Connection>>>,
    /// Fired once when a connection is installed.
    pub(super) bound: CancellationToken,
    pub(super) closer: Closer,
    /// Serializes outbound writes. Owned guards move into the write task.
    pub(super) send_lock: Arc<tokio::sync::Mutex<()>>,
    pub(super) subscriptions: Subscriptions<Address>,
    pub(super) default_handler: RwLock<DefaultMsgHandler>,
    pub(super) receiving: AtomicBool,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("bound", &self.is_bound())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Peer {
    /// Create an Unbound peer for `address`.
    #[must_use]
    pub fn new(address: Address) -> Arc<Self> {
        Self::with_default_handler(address, log_and_drop())
    }

    /// Create an Unbound peer whose unmatched envelopes go to `handler`.
    #[must_use]
    pub fn with_default_handler(address: Address, handler: DefaultMsgHandler) -> Arc<Self> {
        Arc::new(Self {
            address,
            slot: Mutex::new(None),
            bound: CancellationToken::new(),
            closer: Closer::new(),
            send_lock: Arc::new(tokio::sync::Mutex::new(())),
            subscriptions: Subscriptions::new(address),
            default_handler: RwLock::new(handler),
            receiving: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether a connection was ever installed.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.is_cancelled()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    // =========================================================================
    // BINDING
    // =========================================================================

    /// Install `conn` if the peer has no connection yet.
    ///
    /// A second connection is closed instead of replacing the first.
    /// Returns whether `conn` was installed.
    ///
    /// # Panics
    ///
    /// If the peer is closed. Use [`try_create`](Self::try_create) when a
    /// concurrent close is possible.
    pub async fn create(&self, conn: Arc<dyn Connection>) -> bool {
        match self.bind(conn) {
            Bind::Installed => true,
            Bind::Redundant(conn) => {
                dispose(&self.address, conn).await;
                false
            }
            Bind::Closed(conn) => {
                dispose(&self.address, conn).await;
                invariant_violation(format_args!("create on closed peer {}", self.address));
            }
        }
    }

    /// Like [`create`](Self::create), but a closed peer disposes `conn` and
    /// reports [`PeerError::Closed`].
    pub async fn try_create(&self, conn: Arc<dyn Connection>) -> Result<bool, PeerError> {
        match self.bind(conn) {
            Bind::Installed => Ok(true),
            Bind::Redundant(conn) => {
                dispose(&self.address, conn).await;
                Ok(false)
            }
            Bind::Closed(conn) => {
                dispose(&self.address, conn).await;
                Err(PeerError::Closed)
            }
        }
    }

    pub(crate) fn bind(&self, conn: Arc<dyn Connection>) -> Bind {
        let mut slot = self.slot.lock();
        if self.closer.is_closed() {
            return Bind::Closed(conn);
        }
        if slot.is_some() {
            return Bind::Redundant(conn);
        }
        *slot = Some(conn);
        drop(slot);

        self.bound.cancel();
        PEERS_ACTIVE.inc();
        debug!(peer = %self.address, "Peer bound");
        Bind::Installed
    }

    /// Wait until the peer is Bound.
    ///
    /// Fails with [`PeerError::Closed`] if it closes first or
    /// [`PeerError::NotReady`] if `ctx` ends first. Never closes the peer.
    pub async fn wait_ready(&self, ctx: &Context) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.closer.closed() => Err(PeerError::Closed),
            _ = self.bound.cancelled() => {
                if self.is_closed() {
                    Err(PeerError::Closed)
                } else {
                    Ok(())
                }
            }
            err = ctx.done() => Err(PeerError::NotReady(err)),
        }
    }

    pub(super) fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.slot.lock().clone()
    }

    // =========================================================================
    // CLOSING
    // =========================================================================

    /// Tear the peer down.
    ///
    /// Runs close hooks (directory removal), wakes everyone waiting on the
    /// peer, closes the connection and drops every subscription without
    /// notifying the consumers. A second call fails with
    /// [`PeerError::AlreadyClosed`].
    pub async fn close(&self) -> Result<(), PeerError> {
        let hooks = self.closer.start().map_err(|_| PeerError::AlreadyClosed)?;
        self.finish_close(hooks).await
    }

    /// Close only if no connection was installed. Returns whether this call
    /// closed the peer.
    pub(crate) async fn close_unbound(&self) -> bool {
        let hooks = {
            let slot = self.slot.lock();
            if slot.is_some() {
                return false;
            }
            match self.closer.start() {
                Ok(hooks) => hooks,
                Err(_) => return false,
            }
        };
        if let Err(e) = self.finish_close(hooks).await {
            debug!(peer = %self.address, error = %e, "Unbound peer close reported an error");
        }
        true
    }

    async fn finish_close(&self, hooks: Vec<CloseHook>) -> Result<(), PeerError> {
        self.closer.complete(hooks);

        let conn = self.slot.lock().take();
        let result = match conn {
            Some(conn) => {
                PEERS_ACTIVE.dec();
                match conn.close().await {
                    // the receive loop may have closed it after a read error
                    Ok(()) | Err(ConnectionError::Closed) => Ok(()),
                    Err(e) => Err(PeerError::Connection(e)),
                }
            }
            None => Ok(()),
        };

        self.subscriptions.close();
        debug!(peer = %self.address, "Peer closed");
        result
    }

    /// Register a hook run once the peer closes. Returns `false` (after
    /// running it) if the peer is already closed.
    pub fn on_close(&self, hook: CloseHook) -> bool {
        self.closer.on_close(hook)
    }

    /// Like [`on_close`](Self::on_close), with a key for
    /// [`remove_close_hook`](Self::remove_close_hook).
    pub(crate) fn on_close_keyed(&self, hook: CloseHook) -> Option<HookKey> {
        self.closer.on_close_keyed(hook)
    }

    pub(crate) fn remove_close_hook(&self, key: HookKey) {
        self.closer.remove_hook(key);
    }

    #[cfg(test)]
    pub(crate) fn close_hook_count(&self) -> usize {
        self.closer.hook_count()
    }

    /// Resolve once the peer is closed.
    pub async fn closed(&self) {
        self.closer.closed().await;
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Route inbound envelopes matching `predicate` to `consumer`.
    ///
    /// # Panics
    ///
    /// If `consumer` is already subscribed to this peer.
    pub fn subscribe(
        &self,
        consumer: Arc<dyn Consumer>,
        predicate: Predicate,
    ) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        self.subscriptions.add(predicate, consumer)?;
        Ok(())
    }

    /// Stop routing to `consumer`. A no-op on a closed peer.
    ///
    /// # Panics
    ///
    /// If the peer is open and `consumer` is not subscribed.
    pub fn unsubscribe(&self, consumer: ConsumerId) {
        self.subscriptions.delete(consumer);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Replace the handler for envelopes no subscription matched.
    pub fn set_default_handler(&self, handler: DefaultMsgHandler) {
        *self.default_handler.write() = handler;
    }
}

/// Close a connection the peer did not take.
async fn dispose(address: &Address, conn: Arc<dyn Connection>) {
    match conn.close().await {
        Ok(()) => debug!(peer = %address, "Disposed redundant connection"),
        Err(e) => debug!(peer = %address, error = %e, "Redundant connection close failed"),
    }
}
