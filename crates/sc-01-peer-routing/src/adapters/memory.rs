//! In-process duplex pipe.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::Envelope;
use tokio::sync::mpsc;

use crate::domain::{Closer, ConnectionError};
use crate::ports::Connection;

/// Creation and close counts shared by a family of pipes.
#[derive(Debug, Default)]
pub(crate) struct PipeStats {
    pub(crate) created: AtomicUsize,
    pub(crate) closed: AtomicUsize,
}

/// One end of a bounded in-process pipe.
///
/// Closing an end makes the other end's `recv` fail once it has drained
/// what was already sent, and its `send` fail right away.
pub struct MemoryConnection {
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    closer: Closer,
    stats: Option<Arc<PipeStats>>,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("closed", &self.closer.is_closed())
            .finish()
    }
}

impl MemoryConnection {
    /// Two connected ends, each buffering up to `capacity` envelopes.
    #[must_use]
    pub fn pair(capacity: usize) -> (Arc<Self>, Arc<Self>) {
        Self::pair_with_stats(capacity, None)
    }

    pub(crate) fn pair_with_stats(
        capacity: usize,
        stats: Option<Arc<PipeStats>>,
    ) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        if let Some(stats) = &stats {
            stats.created.fetch_add(2, Ordering::SeqCst);
        }
        let end = |tx, rx, stats| {
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
                closer: Closer::new(),
                stats,
            })
        };
        (end(a_tx, a_rx, stats.clone()), end(b_tx, b_rx, stats))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    async fn shutdown(&self) -> Result<(), ConnectionError> {
        self.closer.close().map_err(|_| ConnectionError::Closed)?;
        self.tx.lock().take();
        self.rx.lock().await.close();
        if let Some(stats) = &self.stats {
            stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        let tx = match self.tx.lock().clone() {
            Some(tx) if !self.closer.is_closed() => tx,
            _ => return Err(ConnectionError::Closed),
        };
        tokio::select! {
            biased;
            _ = self.closer.closed() => Err(ConnectionError::Closed),
            sent = tx.send(envelope) => {
                sent.map_err(|_| ConnectionError::Send("remote end closed".into()))
            }
        }
    }

    async fn recv(&self) -> Result<Envelope, ConnectionError> {
        if self.closer.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let received = {
            let mut rx = tokio::select! {
                biased;
                _ = self.closer.closed() => return Err(ConnectionError::Closed),
                rx = self.rx.lock() => rx,
            };
            tokio::select! {
                biased;
                _ = self.closer.closed() => return Err(ConnectionError::Closed),
                received = rx.recv() => received,
            }
        };
        match received {
            Some(envelope) => Ok(envelope),
            None => {
                // a failed read leaves the connection closed
                let _ = self.shutdown().await;
                Err(ConnectionError::Recv("remote end closed".into()))
            }
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.shutdown().await
    }
}
