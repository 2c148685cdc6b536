//! # Driven Ports (Outbound SPI)
//!
//! Transport pieces the host provides. Authentication happens before a
//! connection object exists, so every connection here is already bound to
//! a verified remote identity.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{Address, Envelope};

use crate::domain::{ConnectionError, Context, DialError, ListenerError};

/// Message-oriented duplex stream to one remote participant.
///
/// # Thread Safety
///
/// `send` and `recv` are called concurrently from two tasks (the send path
/// and the receive loop); they must not contend. `send` is never called
/// concurrently with itself.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write one envelope. May not be cancellable mid-write.
    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError>;

    /// Read the next envelope.
    ///
    /// An error is terminal: the connection must be closed afterwards.
    async fn recv(&self) -> Result<Envelope, ConnectionError>;

    /// Close the connection. A second call returns
    /// [`ConnectionError::Closed`].
    async fn close(&self) -> Result<(), ConnectionError>;
}

/// Establishes outbound connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `address`, giving up when `ctx` is done.
    async fn dial(
        &self,
        ctx: &Context,
        address: &Address,
    ) -> Result<Arc<dyn Connection>, DialError>;

    /// Abort in-flight dials and refuse new ones.
    ///
    /// Safe to call repeatedly; later calls return [`DialError::Closed`].
    async fn close(&self) -> Result<(), DialError>;
}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next connection and the identity it authenticated as.
    async fn accept(&self) -> Result<(Address, Arc<dyn Connection>), ListenerError>;

    /// Stop accepting. Pending and later `accept` calls fail.
    async fn close(&self) -> Result<(), ListenerError>;
}
