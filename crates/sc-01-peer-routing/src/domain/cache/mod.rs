//! # Message Cache
//!
//! Holds envelopes a protocol routine will ask for shortly but is not yet
//! waiting on, e.g. an update acceptance that races ahead of the call that
//! sent the update.

#[allow(clippy::module_inception)]
mod cache;


pub use cache::{CacheEntry, MessageCache};
