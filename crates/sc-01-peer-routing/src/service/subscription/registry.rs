//! Predicate-based fan-out of envelopes to consumers.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use shared_types::Envelope;
use tracing::{debug, trace};

use crate::domain::fault::invariant_violation;
use crate::domain::{ConsumerId, HookKey, Predicate, SubscriptionError};
use crate::service::{Consumer, Peer};

struct Entry {
    predicate: Predicate,
    consumer: Arc<dyn Consumer>,
    /// The consumer-side close hook that removes this entry.
    hook: Option<HookKey>,
}

impl Entry {
    /// Withdraw the consumer-side hook of an entry that left the registry.
    fn release(self) {
        if let Some(key) = self.hook {
            self.consumer.remove_close_hook(key);
        }
    }
}

#[derive(Default)]
struct Inner {
    closed: bool,
    entries: Vec<Entry>,
}

impl Inner {
    fn position(&self, id: ConsumerId) -> Option<usize> {
        self.entries.iter().position(|e| e.consumer.id() == id)
    }
}

/// Ordered set of `(predicate, consumer)` pairs routing envelopes on behalf
/// of `owner`.
///
/// `O` labels the entity the registry routes for (a peer address, a relay
/// id) and only shows up in logs. Mutation takes the write lock; delivery
/// snapshots matching consumers under the read lock and awaits each `put`
/// with no lock held, so a consumer may unsubscribe from inside `put`.
pub struct Subscriptions<O> {
    owner: O,
    inner: Arc<RwLock<Inner>>,
}

impl<O: fmt::Debug> fmt::Debug for Subscriptions<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Subscriptions")
            .field("owner", &self.owner)
            .field("closed", &inner.closed)
            .field("entries", &inner.entries.len())
            .finish()
    }
}

impl<O> Subscriptions<O>
where
    O: fmt::Display + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(owner: O) -> Self {
        Self {
            owner,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &O {
        &self.owner
    }

    /// Subscribe `consumer` to every envelope matching `predicate`.
    ///
    /// The entry is dropped again when the consumer closes. Subscribing the
    /// same consumer twice panics. The close hook this leaves on the consumer
    /// is withdrawn when the entry goes away by any other route.
    pub fn add(
        &self,
        predicate: Predicate,
        consumer: Arc<dyn Consumer>,
    ) -> Result<(), SubscriptionError> {
        let id = consumer.id();
        {
            let mut inner = self.inner.write();
            if inner.closed {
                return Err(SubscriptionError::Closed);
            }
            if inner.position(id).is_some() {
                drop(inner);
                invariant_violation(format_args!(
                    "consumer {} subscribed twice to {}",
                    id, self.owner
                ));
            }
            inner.entries.push(Entry {
                predicate,
                consumer: Arc::clone(&consumer),
                hook: None,
            });
        }
        trace!(owner = %self.owner, consumer = %id, "Consumer subscribed");

        let weak: Weak<RwLock<Inner>> = Arc::downgrade(&self.inner);
        let Some(key) = consumer.on_close(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                forget(&inner, id);
            }
        })) else {
            // already closed: the hook ran and took the entry out
            return Ok(());
        };

        let attached = {
            let mut inner = self.inner.write();
            match inner.position(id) {
                Some(idx) if inner.entries[idx].hook.is_none() => {
                    inner.entries[idx].hook = Some(key);
                    true
                }
                _ => false,
            }
        };
        if !attached {
            // deleted (or closed) while the hook was being registered
            consumer.remove_close_hook(key);
        }
        Ok(())
    }

    /// Remove `id`'s entry.
    ///
    /// A no-op once the registry is closed, since closing removed every
    /// entry. Panics if the registry is open and `id` is not subscribed.
    pub fn delete(&self, id: ConsumerId) {
        let mut inner = self.inner.write();
        if inner.closed {
            return;
        }
        match inner.position(id) {
            Some(idx) => {
                let entry = inner.entries.remove(idx);
                drop(inner);
                entry.release();
            }
            None => {
                drop(inner);
                invariant_violation(format_args!(
                    "consumer {} is not subscribed to {}",
                    id, self.owner
                ));
            }
        }
    }

    /// Deliver `envelope` to every consumer whose predicate matches.
    ///
    /// Returns how many consumers received it.
    pub async fn produce(&self, envelope: &Envelope, origin: &Arc<Peer>) -> usize {
        let targets: Vec<Arc<dyn Consumer>> = {
            let inner = self.inner.read();
            inner
                .entries
                .iter()
                .filter(|e| (e.predicate)(envelope))
                .map(|e| Arc::clone(&e.consumer))
                .collect()
        };

        for consumer in &targets {
            trace!(
                owner = %self.owner,
                consumer = %consumer.id(),
                kind = %envelope.kind(),
                "Delivering envelope"
            );
            consumer.put(origin, envelope.clone()).await;
        }
        targets.len()
    }

    /// Drop every entry and refuse new ones.
    ///
    /// Consumers are not told, but their close hooks for this registry are
    /// withdrawn. Returns how many entries were dropped, or `None` if the
    /// registry was already closed.
    pub fn close(&self) -> Option<usize> {
        let dropped = {
            let mut inner = self.inner.write();
            if inner.closed {
                return None;
            }
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };
        let count = dropped.len();
        for entry in dropped {
            entry.release();
        }
        debug!(owner = %self.owner, dropped = count, "Subscriptions closed");
        Some(count)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    #[must_use]
    pub fn contains(&self, id: ConsumerId) -> bool {
        self.inner.read().position(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lenient removal used by consumer close hooks.
fn forget(inner: &RwLock<Inner>, id: ConsumerId) {
    let mut inner = inner.write();
    if let Some(idx) = inner.position(id) {
        inner.entries.remove(idx);
    }
}
