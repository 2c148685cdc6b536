//! Domain Layer - routing primitives with no transport I/O
//!
//! - Context: cancellation and deadlines
//! - Closer: one-shot close latch with hooks
//! - Consumer identity
//! - Message cache: correlation buffer for early arrivals

pub mod cache;
pub mod closer;
pub mod consumer;
pub mod context;
pub mod errors;
pub mod fault;
pub mod predicates;

pub use cache::{CacheEntry, MessageCache};
pub use closer::{AlreadyClosed, CloseHook, Closer, HookKey};
pub use consumer::ConsumerId;
pub use context::Context;
pub use errors::*;
pub use predicates::Predicate;
