//! Envelope predicates.
//!
//! Subscriptions and the message cache select envelopes with a [`Predicate`].
//! Any `Fn(&Envelope) -> bool` closure works; the helpers below cover the
//! correlation keys the channel protocol filters on.

use std::sync::Arc;

use shared_types::{Address, ChannelId, Envelope, MsgCategory, MsgKind, ProposalId};

/// Pure function deciding whether an envelope is of interest.
pub type Predicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn from_fn<F>(f: F) -> Predicate
where
    F: Fn(&Envelope) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Matches every envelope.
#[must_use]
pub fn any() -> Predicate {
    Arc::new(|_: &Envelope| true)
}

#[must_use]
pub fn is_kind(kind: MsgKind) -> Predicate {
    Arc::new(move |env: &Envelope| env.kind() == kind)
}

#[must_use]
pub fn is_category(category: MsgCategory) -> Predicate {
    Arc::new(move |env: &Envelope| env.msg.category() == category)
}

/// Matches messages about `channel`.
#[must_use]
pub fn for_channel(channel: ChannelId) -> Predicate {
    Arc::new(move |env: &Envelope| env.msg.channel_id() == Some(channel))
}

/// Matches proposal, acceptance and rejection messages of `proposal`.
#[must_use]
pub fn for_proposal(proposal: ProposalId) -> Predicate {
    Arc::new(move |env: &Envelope| env.msg.proposal_id() == Some(proposal))
}

#[must_use]
pub fn from_sender(sender: Address) -> Predicate {
    Arc::new(move |env: &Envelope| env.sender == sender)
}

/// Matches when both predicates match.
#[must_use]
pub fn and(left: Predicate, right: Predicate) -> Predicate {
    Arc::new(move |env: &Envelope| left(env) && right(env))
}
