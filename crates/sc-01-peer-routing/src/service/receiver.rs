//! # Receiver
//!
//! Consumer that queues matching envelopes from any number of peers for a
//! protocol routine to pull with [`Receiver::next`].
//!
//! Closing discards the backlog: `next` returns `None` from the moment
//! `close` starts, even if envelopes were queued.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::domain::fault::invariant_violation;
use crate::domain::{CloseHook, Closer, ConsumerId, Context, HookKey, Predicate, ReceiverError};
use crate::service::{Consumer, Peer};

type Item = (Arc<Peer>, Envelope);

struct Subscribed {
    peer: Arc<Peer>,
    /// Peer close hook that drops this entry.
    hook: Option<HookKey>,
}

impl Subscribed {
    fn is(&self, peer: *const Peer) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.peer), peer)
    }

    fn release(self) {
        if let Some(key) = self.hook {
            self.peer.remove_close_hook(key);
        }
    }
}

/// Bounded queue of `(origin, envelope)` pairs fed by peer subscriptions.
pub struct Receiver {
    id: ConsumerId,
    capacity: usize,
    tx: mpsc::Sender<Item>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Item>>,
    /// Peers this receiver is subscribed to. `close` flips the closer while
    /// holding this lock, so subscribe/unsubscribe never race it. A peer
    /// leaves the list on its own when it closes.
    peers: Mutex<Vec<Subscribed>>,
    closer: Closer,
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("id", &self.id)
            .field("peers", &self.subscribed_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Receiver {
    /// Create a receiver queueing at most `capacity` envelopes. A full queue
    /// stalls the receive loops feeding it.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Arc::new(Self {
            id: ConsumerId::new(),
            capacity,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            peers: Mutex::new(Vec::new()),
            closer: Closer::new(),
        })
    }

    /// Queue envelopes from `peer` that match `predicate`.
    ///
    /// Only envelopes arriving after this call are delivered.
    ///
    /// # Panics
    ///
    /// If the receiver is already subscribed to `peer`.
    pub fn subscribe(
        self: &Arc<Self>,
        peer: &Arc<Peer>,
        predicate: Predicate,
    ) -> Result<(), ReceiverError> {
        {
            let mut peers = self.peers.lock();
            if self.closer.is_closed() {
                return Err(ReceiverError::Closed);
            }
            let consumer: Arc<dyn Consumer> = Arc::clone(self) as Arc<dyn Consumer>;
            peer.subscribe(consumer, predicate)
                .map_err(|_| ReceiverError::PeerClosed)?;
            peers.push(Subscribed {
                peer: Arc::clone(peer),
                hook: None,
            });
        }

        // registered with the list unlocked: on an already closed peer the
        // hook runs right here
        let receiver = Arc::downgrade(self);
        let origin = Arc::downgrade(peer);
        let Some(key) = peer.on_close_keyed(Box::new(move || {
            if let Some(receiver) = receiver.upgrade() {
                receiver.forget_peer(origin.as_ptr());
            }
        })) else {
            return Ok(());
        };

        let mut peers = self.peers.lock();
        match peers.iter_mut().find(|s| s.is(Arc::as_ptr(peer))) {
            Some(entry) if entry.hook.is_none() => entry.hook = Some(key),
            // unsubscribed or closed in the meantime
            _ => peer.remove_close_hook(key),
        }
        Ok(())
    }

    /// Drop a closed peer from the list. Its subscriptions are gone already.
    fn forget_peer(&self, peer: *const Peer) {
        let mut peers = self.peers.lock();
        if let Some(idx) = peers.iter().position(|s| s.is(peer)) {
            peers.remove(idx);
            trace!(receiver = %self.id, "Closed peer dropped from receiver");
        }
    }

    /// Stop receiving from `peer`. A no-op for a peer that has closed.
    ///
    /// # Panics
    ///
    /// If the receiver and `peer` are open and not subscribed to each other.
    pub fn unsubscribe(&self, peer: &Arc<Peer>) -> Result<(), ReceiverError> {
        let mut peers = self.peers.lock();
        if self.closer.is_closed() {
            return Err(ReceiverError::Closed);
        }
        match peers.iter().position(|s| s.is(Arc::as_ptr(peer))) {
            Some(idx) => {
                let entry = peers.remove(idx);
                entry.peer.unsubscribe(self.id);
                entry.release();
                Ok(())
            }
            None if peer.is_closed() => Ok(()),
            None => {
                drop(peers);
                invariant_violation(format_args!(
                    "receiver {} is not subscribed to {}",
                    self.id,
                    peer.address()
                ));
            }
        }
    }

    /// Stop receiving from every peer. The receiver stays open.
    pub fn unsubscribe_all(&self) -> Result<(), ReceiverError> {
        let mut peers = self.peers.lock();
        if self.closer.is_closed() {
            return Err(ReceiverError::Closed);
        }
        for entry in peers.drain(..) {
            entry.peer.unsubscribe(self.id);
            entry.release();
        }
        Ok(())
    }

    /// Wait for the next queued envelope.
    ///
    /// Returns `None` when `ctx` ends or the receiver closes.
    pub async fn next(&self, ctx: &Context) -> Option<Item> {
        if self.closer.is_closed() {
            return None;
        }
        let mut rx = tokio::select! {
            biased;
            _ = self.closer.closed() => return None,
            _ = ctx.done() => return None,
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = self.closer.closed() => None,
            _ = ctx.done() => None,
            item = rx.recv() => item.filter(|_| !self.closer.is_closed()),
        }
    }

    /// Take a queued envelope without waiting.
    pub fn try_next(&self) -> Option<Item> {
        if self.closer.is_closed() {
            return None;
        }
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Unsubscribe from every peer, drop the backlog and release every
    /// waiting `next`. A second call fails with
    /// [`ReceiverError::AlreadyClosed`].
    pub async fn close(&self) -> Result<(), ReceiverError> {
        let (hooks, peers) = {
            let mut peers = self.peers.lock();
            let hooks = self
                .closer
                .start()
                .map_err(|_| ReceiverError::AlreadyClosed)?;
            (hooks, std::mem::take(&mut *peers))
        };
        // hooks drop this receiver from every peer it subscribed to
        self.closer.complete(hooks);
        let peer_count = peers.len();
        for entry in peers {
            entry.release();
        }

        let mut rx = self.rx.lock().await;
        rx.close();
        let mut discarded = 0usize;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        debug!(
            receiver = %self.id,
            peers = peer_count,
            discarded,
            "Receiver closed"
        );
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Number of open peers currently subscribed to.
    #[must_use]
    pub fn subscribed_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Most envelopes queued at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl Consumer for Receiver {
    fn id(&self) -> ConsumerId {
        self.id
    }

    async fn put(&self, origin: &Arc<Peer>, envelope: Envelope) {
        if self.closer.is_closed() {
            return;
        }
        tokio::select! {
            biased;
            _ = self.closer.closed() => {
                trace!(receiver = %self.id, "Receiver closed, envelope dropped");
            }
            sent = self.tx.send((Arc::clone(origin), envelope)) => {
                if sent.is_err() {
                    trace!(receiver = %self.id, "Receiver queue closed, envelope dropped");
                }
            }
        }
    }

    fn on_close(&self, hook: CloseHook) -> Option<HookKey> {
        self.closer.on_close_keyed(hook)
    }

    fn remove_close_hook(&self, key: HookKey) {
        self.closer.remove_hook(key);
    }
}
