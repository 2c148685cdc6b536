//! In-process network of named endpoints.
//!
//! A [`ConnHub`] stands in for a transport in tests and single-process
//! deployments. Listeners register under an address; dialing that address
//! creates a [`MemoryConnection`] pair, hands one end to the listener tagged
//! with the dialer's own address (as an authenticated transport would) and
//! returns the other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::Address;
use tokio::sync::mpsc;
use tracing::debug;

use super::memory::{MemoryConnection, PipeStats};
use crate::domain::{Closer, Context, DialError, ListenerError};
use crate::ports::{Connection, Dialer, Listener};

type Accepted = (Address, Arc<dyn Connection>);

struct HubInner {
    listeners: Mutex<HashMap<Address, mpsc::UnboundedSender<Accepted>>>,
    stats: Arc<PipeStats>,
    capacity: usize,
}

/// Shared in-process network.
#[derive(Clone)]
pub struct ConnHub {
    inner: Arc<HubInner>,
}

impl Default for ConnHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnHub {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(crate::DEFAULT_RECEIVER_CAPACITY)
    }

    /// Hub whose pipes buffer up to `capacity` envelopes per direction.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                listeners: Mutex::new(HashMap::new()),
                stats: Arc::new(PipeStats::default()),
                capacity,
            }),
        }
    }

    /// Start listening as `address`, replacing any earlier listener there.
    #[must_use]
    pub fn listener(&self, address: Address) -> Arc<HubListener> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners.lock().insert(address, tx);
        Arc::new(HubListener {
            address,
            hub: Arc::clone(&self.inner),
            rx: tokio::sync::Mutex::new(rx),
            closer: Closer::new(),
        })
    }

    /// Dialer presenting itself as `local`.
    #[must_use]
    pub fn dialer(&self, local: Address) -> Arc<HubDialer> {
        self.dialer_with_delay(local, Duration::ZERO)
    }

    /// Dialer that waits `delay` before connecting, to exercise in-flight
    /// dials.
    #[must_use]
    pub fn dialer_with_delay(&self, local: Address, delay: Duration) -> Arc<HubDialer> {
        Arc::new(HubDialer {
            local,
            hub: Arc::clone(&self.inner),
            delay,
            closer: Closer::new(),
            dials: AtomicUsize::new(0),
        })
    }

    /// Connection ends created so far (two per successful dial).
    #[must_use]
    pub fn created(&self) -> usize {
        self.inner.stats.created.load(Ordering::SeqCst)
    }

    /// Connection ends closed so far.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.inner.stats.closed.load(Ordering::SeqCst)
    }

    /// Connection ends still open.
    #[must_use]
    pub fn open(&self) -> usize {
        self.created().saturating_sub(self.closed())
    }
}

// =============================================================================
// LISTENER
// =============================================================================

/// Accepting side of a hub address.
pub struct HubListener {
    address: Address,
    hub: Arc<HubInner>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Accepted>>,
    closer: Closer,
}

impl HubListener {
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl Listener for HubListener {
    async fn accept(&self) -> Result<Accepted, ListenerError> {
        if self.closer.is_closed() {
            return Err(ListenerError::Closed);
        }
        let mut rx = tokio::select! {
            biased;
            _ = self.closer.closed() => return Err(ListenerError::Closed),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = self.closer.closed() => Err(ListenerError::Closed),
            accepted = rx.recv() => accepted.ok_or(ListenerError::Closed),
        }
    }

    async fn close(&self) -> Result<(), ListenerError> {
        self.closer.close().map_err(|_| ListenerError::Closed)?;
        self.hub.listeners.lock().remove(&self.address);

        // connections nobody will accept any more
        let mut rx = self.rx.lock().await;
        rx.close();
        while let Ok((remote, conn)) = rx.try_recv() {
            debug!(listener = %self.address, peer = %remote, "Closing unaccepted connection");
            let _ = conn.close().await;
        }
        Ok(())
    }
}

// =============================================================================
// DIALER
// =============================================================================

/// Connecting side bound to a local identity.
pub struct HubDialer {
    local: Address,
    hub: Arc<HubInner>,
    delay: Duration,
    closer: Closer,
    dials: AtomicUsize,
}

impl HubDialer {
    /// Number of `dial` calls so far, successful or not.
    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for HubDialer {
    async fn dial(
        &self,
        ctx: &Context,
        address: &Address,
    ) -> Result<Arc<dyn Connection>, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.closer.is_closed() {
            return Err(DialError::Closed);
        }
        if let Some(err) = ctx.err() {
            return Err(DialError::Aborted(err));
        }
        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = self.closer.closed() => return Err(DialError::Closed),
                err = ctx.done() => return Err(DialError::Aborted(err)),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let target = self
            .hub
            .listeners
            .lock()
            .get(address)
            .cloned()
            .ok_or(DialError::Unreachable(*address))?;

        let (local_end, remote_end) = MemoryConnection::pair_with_stats(
            self.hub.capacity,
            Some(Arc::clone(&self.hub.stats)),
        );
        if let Err(mpsc::error::SendError((_, remote_end))) =
            target.send((self.local, remote_end as Arc<dyn Connection>))
        {
            let _ = remote_end.close().await;
            let _ = local_end.close().await;
            return Err(DialError::Unreachable(*address));
        }
        debug!(local = %self.local, peer = %address, "Hub connection established");
        Ok(local_end)
    }

    async fn close(&self) -> Result<(), DialError> {
        self.closer.close().map_err(|_| DialError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ping;

    #[tokio::test]
    async fn test_dial_reaches_listener_with_identity() {
        let hub = ConnHub::new();
        let (alice, bob) = (Address::new([1; 20]), Address::new([2; 20]));
        let listener = hub.listener(bob);
        let dialer = hub.dialer(alice);

        let conn = dialer.dial(&Context::background(), &bob).await.unwrap();
        let (remote, accepted) = listener.accept().await.unwrap();
        assert_eq!(remote, alice);

        conn.send(ping(1)).await.unwrap();
        assert_eq!(accepted.recv().await.unwrap(), ping(1));
        assert_eq!(hub.created(), 2);
        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_dial_unknown_address() {
        let hub = ConnHub::new();
        let dialer = hub.dialer(Address::new([1; 20]));
        let target = Address::new([9; 20]);
        assert_eq!(
            dialer.dial(&Context::background(), &target).await.err(),
            Some(DialError::Unreachable(target))
        );
        assert_eq!(hub.created(), 0);
    }

    #[tokio::test]
    async fn test_closed_dialer_refuses() {
        let hub = ConnHub::new();
        let bob = Address::new([2; 20]);
        let _listener = hub.listener(bob);
        let dialer = hub.dialer(Address::new([1; 20]));

        dialer.close().await.unwrap();
        assert_eq!(dialer.close().await, Err(DialError::Closed));
        assert_eq!(
            dialer.dial(&Context::background(), &bob).await.err(),
            Some(DialError::Closed)
        );
    }

    #[tokio::test]
    async fn test_close_aborts_delayed_dial() {
        let hub = ConnHub::new();
        let bob = Address::new([2; 20]);
        let _listener = hub.listener(bob);
        let dialer = hub.dialer_with_delay(Address::new([1; 20]), Duration::from_secs(30));

        let pending = {
            let dialer = Arc::clone(&dialer);
            tokio::spawn(async move { dialer.dial(&Context::background(), &bob).await.err() })
        };
        tokio::task::yield_now().await;
        dialer.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("dial aborted")
            .unwrap();
        assert_eq!(result, Some(DialError::Closed));
    }

    #[tokio::test]
    async fn test_listener_close_disposes_pending() {
        let hub = ConnHub::new();
        let bob = Address::new([2; 20]);
        let listener = hub.listener(bob);
        let dialer = hub.dialer(Address::new([1; 20]));

        let conn = dialer.dial(&Context::background(), &bob).await.unwrap();
        listener.close().await.unwrap();
        assert_eq!(listener.accept().await.err(), Some(ListenerError::Closed));
        assert_eq!(hub.closed(), 1);

        conn.close().await.unwrap();
        assert_eq!(hub.open(), 0);
    }
}
