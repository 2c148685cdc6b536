//! # Registry
//!
//! Directory of peers and single entry point for obtaining one to send to.
//!
//! ## Invariants
//!
//! - At most one peer per address while it is registered
//! - Concurrent `get`s for a new address dial exactly once
//! - A peer leaves the directory exactly once, from its own close hook

mod directory;


pub use directory::{NewPeerHook, Registry};
