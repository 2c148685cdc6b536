//! # Peer Routing Subsystem
//!
//! **Subsystem ID:** 1
//!
//! This crate is the peer-connection and message-routing layer of a
//! state-channel node. It establishes and deduplicates connections to known
//! participants, delivers inbound envelopes to interested local consumers via
//! predicate-based subscriptions, fans messages out with partial-failure
//! reporting, and tears every connection down exactly once no matter which of
//! several concurrent triggers (explicit close, send failure, dial failure,
//! timeout) caused it.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** context, closers, consumer ids, errors, message cache
//! - **Ports Layer:** `Connection`, `Dialer`, `Listener` (driven by the host transport)
//! - **Service Layer:** `Peer`, `Registry`, `Receiver`, `Relay`, `Broadcaster`,
//!   plus the `Consumer` seam and the `Subscriptions` registry behind it
//! - **Adapters Layer:** in-process hub and framed byte-stream connections
//!
//! ```text
//!   Dialer / Listener
//!          │
//!          ▼
//!   ┌────────────┐  get/register  ┌──────────┐  recv loop  ┌───────────────┐
//!   │  Registry  │ ─────────────▶ │   Peer   │ ──────────▶ │ Subscriptions │
//!   └────────────┘                └──────────┘             └───────┬───────┘
//!                                     ▲  send                      │ put
//!                         Broadcaster ┘                 Receiver / Relay
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use sc_01_peer_routing::{adapters::ConnHub, predicates, Context, Receiver, Registry, RegistryConfig};
//! use shared_types::Address;
//!
//! let hub = ConnHub::new();
//! let (alice, bob) = (Address::random(), Address::random());
//! let registry = Registry::new(alice, hub.dialer(alice), None, RegistryConfig::default());
//!
//! let peer = registry.get(&bob)?;
//! let receiver = registry.receiver();
//! receiver.subscribe(&peer, predicates::for_channel(channel_id))?;
//! peer.send(&Context::background(), envelope).await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

/// Connection, dialer and listener implementations.
pub mod adapters;

/// Test utilities (recording connections, failing dialers, envelope builders).
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::RegistryConfig;

pub use domain::{
    predicates, AlreadyClosed, BroadcastError, CacheEntry, CloseHook, Closer, ConfigError,
    ConnectionError, ConsumerId, Context, ContextError, DialError, HookKey, ListenerError,
    MessageCache, PeerError, Predicate, ReceiverError, RegistryError, RelayError,
    SubscriptionError,
};

pub use ports::{Connection, Dialer, Listener};

pub use service::{
    log_and_drop, Broadcaster, Consumer, DefaultMsgHandler, NewPeerHook, Peer, Receiver,
    Registry, Relay, Subscriptions,
};

/// Default capacity of a [`Receiver`] queue.
pub const DEFAULT_RECEIVER_CAPACITY: usize = 64;

/// Default upper bound of a single framed envelope, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 20;
