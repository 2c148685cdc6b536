//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! Driven ports only: the connections, dialers and listeners the host
//! transport provides. Consumers are a service-layer seam since they see
//! the originating [`Peer`](crate::Peer).

pub mod outbound;

pub use outbound::{Connection, Dialer, Listener};
