//! # Subscription Registry
//!
//! One generic registry type serves both places envelopes fan out: every
//! [`Peer`](crate::Peer) routes its inbound traffic through one, and every
//! [`Relay`](crate::Relay) re-publishes through another.
//!
//! ## Invariants
//!
//! - A consumer appears at most once per registry
//! - Closing the registry removes every entry and rejects later `add`s
//! - A consumer that closes is removed from every registry it joined

mod registry;

#[cfg(test)]
mod tests;

pub use registry::Subscriptions;
