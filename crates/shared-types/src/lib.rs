//! # Shared Types Crate
//!
//! Identities and state-channel protocol messages shared by every crate in
//! the workspace.
//!
//! ## Design Principles
//!
//! - **Opaque identity**: [`Address`] is compared, hashed and serialized but
//!   never interpreted by the routing layer.
//! - **Envelope authority**: every routed value is an [`Envelope`]; the
//!   `sender` field is the identity the connection was authenticated as.
//! - **Payload agnostic**: [`Msg`] variants are carried as-is. Deciding what
//!   to send and when belongs to the protocol layer above.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod message;

pub use entities::*;
pub use envelope::Envelope;
pub use errors::*;
pub use message::*;
