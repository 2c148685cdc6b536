//! # Peer
//!
//! Local handle for one remote participant. Mediates every access to the
//! participant's connection.
//!
//! ## State Machine
//!
//! ```text
//!   Unbound ──create──▶ Bound ──close──▶ Closed
//!      │                                   ▲
//!      └──────────── close / dial failure ─┘
//! ```
//!
//! ## Concurrency
//!
//! - The connection slot is written once and taken once, under a mutex
//! - Sends are serialized by an async lock; the receive loop never takes it
//! - Close races between send failure, dial failure, read errors and explicit
//!   close are settled by a one-shot [`Closer`](crate::Closer)

mod lifecycle;
mod receive;
mod send;

#[cfg(test)]
mod tests;

pub(crate) use self::lifecycle::Bind;
pub use self::lifecycle::Peer;
