//! Test utilities for peer routing.
//!
//! Scriptable connections, dialers and consumers for deterministic tests.
//! Enable with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_01_peer_routing::test_utils::{ping, RecordingConnection};
//! use sc_01_peer_routing::{Context, Peer};
//!
//! let peer = Peer::new(shared_types::Address::random());
//! let conn = RecordingConnection::new();
//! peer.try_create(conn.clone()).await?;
//! peer.send(&Context::background(), ping(1)).await?;
//! assert_eq!(conn.sent(), vec![ping(1)]);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{Address, ChannelUpdate, Envelope, Msg, Version};
use tokio::sync::mpsc;

use crate::domain::{CloseHook, Closer, ConnectionError, ConsumerId, Context, DialError, HookKey};
use crate::ports::{Connection, Dialer};
use crate::service::{Consumer, Peer};

// =============================================================================
// ENVELOPE BUILDERS
// =============================================================================

/// Address whose every byte is `n`.
#[must_use]
pub fn addr(n: u8) -> Address {
    Address::new([n; 20])
}

#[must_use]
pub fn ping(created_ms: u64) -> Envelope {
    Envelope::new(addr(1), addr(2), Msg::Ping { created_ms })
}

#[must_use]
pub fn pong(created_ms: u64) -> Envelope {
    Envelope::new(addr(2), addr(1), Msg::Pong { created_ms })
}

/// Channel update for channel `[channel; 32]` at `version`.
#[must_use]
pub fn update(channel: u8, version: Version) -> Envelope {
    Envelope::new(
        addr(1),
        addr(2),
        Msg::ChannelUpdate(ChannelUpdate {
            channel_id: [channel; 32],
            version,
            actor_idx: 0,
            state: vec![channel; 16],
            sig: vec![0xAB; 65],
        }),
    )
}

// =============================================================================
// RECORDING CONNECTION
// =============================================================================

/// Connection that records writes and replays scripted reads.
pub struct RecordingConnection {
    sent: Mutex<Vec<Envelope>>,
    send_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_sends: AtomicBool,
    fail_close: AtomicBool,
    stall_sends: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<Result<Envelope, ConnectionError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Envelope, ConnectionError>>>,
    closer: Closer,
}

impl RecordingConnection {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            stall_sends: AtomicBool::new(false),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            closer: Closer::new(),
        })
    }

    /// Queue an envelope for `recv` to return.
    pub fn push_inbound(&self, envelope: Envelope) {
        let _ = self.inbound_tx.send(Ok(envelope));
    }

    /// Make the next pending `recv` fail.
    pub fn push_recv_error(&self) {
        let _ = self
            .inbound_tx
            .send(Err(ConnectionError::Recv("scripted failure".into())));
    }

    /// Make every later `send` fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Make `close` report an error. The connection still closes.
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Make every later `send` hang forever.
    pub fn stall_sends(&self) {
        self.stall_sends.store(true, Ordering::SeqCst);
    }

    /// Envelopes written successfully, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    /// Number of `send` calls, including failed ones.
    #[must_use]
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.closer.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::Send("scripted failure".into()));
        }
        self.sent.lock().push(envelope);
        Ok(())
    }

    async fn recv(&self) -> Result<Envelope, ConnectionError> {
        let received = {
            let mut rx = self.inbound_rx.lock().await;
            tokio::select! {
                biased;
                _ = self.closer.closed() => return Err(ConnectionError::Closed),
                received = rx.recv() => received,
            }
        };
        match received {
            Some(Ok(envelope)) => Ok(envelope),
            Some(Err(e)) => {
                let _ = self.closer.close();
                Err(e)
            }
            None => Err(ConnectionError::Closed),
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closer.close().map_err(|_| ConnectionError::Closed)?;
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ConnectionError::Send("scripted close failure".into()));
        }
        Ok(())
    }
}

// =============================================================================
// RECORDING DIALER
// =============================================================================

/// Dialer handing out fresh [`RecordingConnection`]s, or failing.
pub struct RecordingDialer {
    delay: Duration,
    fail: bool,
    dials: AtomicUsize,
    conns: Mutex<Vec<Arc<RecordingConnection>>>,
    closer: Closer,
}

impl RecordingDialer {
    /// Dialer that succeeds after `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Arc<Self> {
        Self::build(delay, false)
    }

    /// Dialer whose every dial fails after `delay`.
    #[must_use]
    pub fn failing(delay: Duration) -> Arc<Self> {
        Self::build(delay, true)
    }

    fn build(delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail,
            dials: AtomicUsize::new(0),
            conns: Mutex::new(Vec::new()),
            closer: Closer::new(),
        })
    }

    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Connections handed out so far.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<RecordingConnection>> {
        self.conns.lock().clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn dial(
        &self,
        ctx: &Context,
        address: &Address,
    ) -> Result<Arc<dyn Connection>, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            biased;
            _ = self.closer.closed() => return Err(DialError::Closed),
            err = ctx.done() => return Err(DialError::Aborted(err)),
            _ = tokio::time::sleep(self.delay) => {}
        }
        if self.fail {
            return Err(DialError::Unreachable(*address));
        }
        let conn = RecordingConnection::new();
        self.conns.lock().push(Arc::clone(&conn));
        Ok(conn)
    }

    async fn close(&self) -> Result<(), DialError> {
        self.closer.close().map_err(|_| DialError::Closed)
    }
}

// =============================================================================
// RECORDING CONSUMER
// =============================================================================

/// Consumer that stores every envelope it is given.
pub struct RecordingConsumer {
    id: ConsumerId,
    received: Mutex<Vec<(Address, Envelope)>>,
    closer: Closer,
}

impl RecordingConsumer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConsumerId::new(),
            received: Mutex::new(Vec::new()),
            closer: Closer::new(),
        })
    }

    /// `(origin address, envelope)` pairs in delivery order.
    #[must_use]
    pub fn received(&self) -> Vec<(Address, Envelope)> {
        self.received.lock().clone()
    }

    pub fn close(&self) {
        let _ = self.closer.close();
    }

    /// Close hooks registered and not yet withdrawn.
    #[must_use]
    pub fn pending_hooks(&self) -> usize {
        self.closer.hook_count()
    }
}

#[async_trait]
impl Consumer for RecordingConsumer {
    fn id(&self) -> ConsumerId {
        self.id
    }

    async fn put(&self, origin: &Arc<Peer>, envelope: Envelope) {
        self.received.lock().push((origin.address(), envelope));
    }

    fn on_close(&self, hook: CloseHook) -> Option<HookKey> {
        self.closer.on_close_keyed(hook)
    }

    fn remove_close_hook(&self, key: HookKey) {
        self.closer.remove_hook(key);
    }
}
