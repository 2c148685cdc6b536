//! Domain Errors for Peer Routing
//!
//! Recoverable failures only. Contract breaches (duplicate subscription,
//! deleting an absent entry) are not represented here; they go through
//! [`invariant_violation`](super::fault::invariant_violation).

use shared_types::Address;
use thiserror::Error;

/// Why a [`Context`](super::Context) is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled explicitly.
    #[error("context cancelled")]
    Cancelled,
    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors from a [`Connection`](crate::ports::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
    /// Writing an envelope failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Reading an envelope failed.
    #[error("receive failed: {0}")]
    Recv(String),
    /// A frame exceeded the configured limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    /// An envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Errors from a [`Dialer`](crate::ports::Dialer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    /// The dialer was closed; in-flight and future dials fail.
    #[error("dialer closed")]
    Closed,
    /// Nobody is listening for this address.
    #[error("no listener for {0}")]
    Unreachable(Address),
    /// The dial context ended first.
    #[error("dial aborted: {0}")]
    Aborted(#[from] ContextError),
    /// Establishing the connection failed.
    #[error("dial failed: {0}")]
    Connection(#[from] ConnectionError),
}

/// Errors from a [`Listener`](crate::ports::Listener).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// The listener was closed.
    #[error("listener closed")]
    Closed,
    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    Accept(String),
}

/// Errors from a [`Subscriptions`](crate::Subscriptions) registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The entity the registry routes for is closed.
    #[error("subscription target closed")]
    Closed,
}

/// Errors from [`Peer`](crate::Peer) operations.
///
/// Every send failure has already closed the peer by the time it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// `close` was called on a peer that is already closed.
    #[error("peer already closed")]
    AlreadyClosed,
    /// The peer is closed.
    #[error("peer closed")]
    Closed,
    /// The context ended before the peer had a connection.
    #[error("peer not ready: {0}")]
    NotReady(ContextError),
    /// The context ended while waiting for the send lock or the write.
    #[error("send aborted: {0}")]
    Aborted(ContextError),
    /// The underlying write failed.
    #[error("send failed: {0}")]
    Connection(#[from] ConnectionError),
    /// The write task panicked or was cancelled.
    #[error("send task failed: {0}")]
    Task(String),
}

impl PeerError {
    /// Label used for the send-failure metric.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AlreadyClosed | Self::Closed => "closed",
            Self::NotReady(_) => "not_ready",
            Self::Aborted(_) => "cancelled",
            Self::Connection(_) => "connection",
            Self::Task(_) => "task",
        }
    }
}

impl From<SubscriptionError> for PeerError {
    fn from(_: SubscriptionError) -> Self {
        Self::Closed
    }
}

/// Errors from [`Registry`](crate::Registry) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry is closed.
    #[error("registry closed")]
    Closed,
    /// `close` was called a second time.
    #[error("registry already closed")]
    AlreadyClosed,
    /// Closing the dialer failed.
    #[error("dialer: {0}")]
    Dial(#[from] DialError),
    /// Closing a peer failed.
    #[error("peer: {0}")]
    Peer(#[from] PeerError),
}

/// Errors from [`Receiver`](crate::Receiver) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReceiverError {
    /// The receiver is closed.
    #[error("receiver closed")]
    Closed,
    /// `close` was called a second time.
    #[error("receiver already closed")]
    AlreadyClosed,
    /// The peer to subscribe to is closed.
    #[error("peer closed")]
    PeerClosed,
}

/// Errors from [`Relay`](crate::Relay) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The relay is closed.
    #[error("relay closed")]
    Closed,
    /// `close` was called a second time.
    #[error("relay already closed")]
    AlreadyClosed,
}

impl From<SubscriptionError> for RelayError {
    fn from(_: SubscriptionError) -> Self {
        Self::Closed
    }
}

/// Partial failure of a [`Broadcaster`](crate::Broadcaster) send.
///
/// Carries the index (into the broadcaster's peer list) and cause of every
/// peer that failed. Peers not listed received the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("broadcast failed for {} peer(s): {}", .failures.len(), describe_failures(.failures))]
pub struct BroadcastError {
    pub failures: Vec<(usize, PeerError)>,
}

impl BroadcastError {
    /// Indices of the peers that failed, in ascending order.
    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|(idx, _)| *idx).collect()
    }

    /// Cause for the peer at `index`, if it failed.
    #[must_use]
    pub fn cause(&self, index: usize) -> Option<&PeerError> {
        self.failures
            .iter()
            .find(|(idx, _)| *idx == index)
            .map(|(_, err)| err)
    }
}

fn describe_failures(failures: &[(usize, PeerError)]) -> String {
    failures
        .iter()
        .map(|(idx, err)| format!("peer[{}]: {}", idx, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from loading a [`RegistryConfig`](crate::RegistryConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}
