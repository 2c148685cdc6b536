//! Service Layer - peers, the peer directory and the built-in consumers
//!
//! - [`Peer`]: one connection slot, its send path and receive loop
//! - [`Registry`]: lookup-or-dial directory of peers
//! - [`Receiver`]: consumer queueing envelopes for a protocol routine
//! - [`Relay`]: consumer republishing envelopes to further consumers
//! - [`Broadcaster`]: fan-out send with per-peer failure reporting
//! - [`Subscriptions`]: predicate-based fan-out to [`Consumer`]s

mod broadcaster;
mod consumer;
pub(crate) mod peer;
mod receiver;
mod registry;
mod relay;
mod subscription;

pub use broadcaster::Broadcaster;
pub use consumer::{log_and_drop, Consumer, DefaultMsgHandler};
pub use peer::Peer;
pub use receiver::Receiver;
pub use registry::{NewPeerHook, Registry};
pub use relay::Relay;
pub use subscription::Subscriptions;
