//! The seam protocol code plugs into to receive envelopes.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::Envelope;
use tracing::debug;

use crate::domain::{CloseHook, ConsumerId, HookKey};
use crate::service::Peer;

/// Anything that can be subscribed to a [`Peer`] or a
/// [`Relay`](crate::Relay).
///
/// [`Receiver`](crate::Receiver) and [`Relay`](crate::Relay) are the
/// built-in implementations.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Stable identity, used to detect duplicate subscriptions.
    fn id(&self) -> ConsumerId;

    /// Accept an envelope that arrived from `origin`.
    ///
    /// Called from the origin's receive loop; a slow `put` delays later
    /// envelopes from the same peer.
    async fn put(&self, origin: &Arc<Peer>, envelope: Envelope);

    /// Run `hook` when the consumer closes.
    ///
    /// Returns `None` if it is already closed, in which case `hook` has run
    /// before returning.
    fn on_close(&self, hook: CloseHook) -> Option<HookKey>;

    /// Withdraw a hook from [`on_close`](Self::on_close) that has not run.
    fn remove_close_hook(&self, key: HookKey);
}

/// Called for inbound envelopes that matched no subscription.
pub type DefaultMsgHandler = Arc<dyn Fn(&Arc<Peer>, &Envelope) + Send + Sync>;

/// The stock handler: log at debug level and drop the envelope.
#[must_use]
pub fn log_and_drop() -> DefaultMsgHandler {
    Arc::new(|peer: &Arc<Peer>, envelope: &Envelope| {
        debug!(
            peer = %peer.address(),
            kind = %envelope.kind(),
            "Dropping unhandled envelope"
        );
    })
}
