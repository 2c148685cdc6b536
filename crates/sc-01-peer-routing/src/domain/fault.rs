//! Contract violations.
//!
//! A caller breaking an API contract (subscribing the same consumer twice,
//! deleting a directory entry that is not there) is a bug, not a runtime
//! condition. These paths log at error level and panic.

/// Log `what` at error level and panic with it.
#[track_caller]
pub fn invariant_violation(what: impl std::fmt::Display) -> ! {
    let message = format!("invariant violation: {}", what);
    tracing::error!(target: "sc_01_peer_routing::fault", "{}", message);
    panic!("{}", message);
}
