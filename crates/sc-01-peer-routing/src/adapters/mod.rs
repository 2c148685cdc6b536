//! Adapters Layer - concrete connections, dialers and listeners
//!
//! - `memory`: bounded in-process duplex pipe
//! - `hub`: in-process network of listeners and dialers over memory pipes
//! - `stream`: length-prefixed bincode framing over tokio byte streams

pub mod hub;
pub mod memory;
pub mod stream;

pub use hub::{ConnHub, HubDialer, HubListener};
pub use memory::MemoryConnection;
pub use stream::StreamConnection;
