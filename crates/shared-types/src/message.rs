//! # State-Channel Messages
//!
//! The protocol messages exchanged between channel participants. The routing
//! layer only needs their kind and correlation keys to evaluate predicates;
//! the meaning of each payload belongs to the protocol layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entities::{ChannelId, ProposalId, Version};

/// Coarse grouping of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgCategory {
    /// Connection liveness and shutdown.
    Control,
    /// Channel opening negotiation.
    Proposal,
    /// Messages about an existing channel.
    Channel,
}

/// Kind tag of a [`Msg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgKind {
    Ping,
    Pong,
    Shutdown,
    ChannelProposal,
    ChannelProposalAcc,
    ChannelProposalRej,
    ChannelUpdate,
    ChannelUpdateAcc,
    ChannelUpdateRej,
    ChannelSync,
}

impl MsgKind {
    /// The category this kind belongs to.
    #[must_use]
    pub fn category(self) -> MsgCategory {
        match self {
            Self::Ping | Self::Pong | Self::Shutdown => MsgCategory::Control,
            Self::ChannelProposal | Self::ChannelProposalAcc | Self::ChannelProposalRej => {
                MsgCategory::Proposal
            }
            Self::ChannelUpdate
            | Self::ChannelUpdateAcc
            | Self::ChannelUpdateRej
            | Self::ChannelSync => MsgCategory::Channel,
        }
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Shutdown => "Shutdown",
            Self::ChannelProposal => "ChannelProposal",
            Self::ChannelProposalAcc => "ChannelProposalAcc",
            Self::ChannelProposalRej => "ChannelProposalRej",
            Self::ChannelUpdate => "ChannelUpdate",
            Self::ChannelUpdateAcc => "ChannelUpdateAcc",
            Self::ChannelUpdateRej => "ChannelUpdateRej",
            Self::ChannelSync => "ChannelSync",
        };
        f.write_str(name)
    }
}

/// A channel opening proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProposal {
    pub proposal_id: ProposalId,
    /// Challenge duration of the proposed channel, in seconds.
    pub challenge_duration: u64,
    /// Opaque encoded initial allocation.
    pub init_bals: Vec<u8>,
}

/// A proposed new channel state, signed by the proposer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub channel_id: ChannelId,
    pub version: Version,
    /// Index of the participant proposing the update.
    pub actor_idx: u16,
    /// Opaque encoded state.
    pub state: Vec<u8>,
    pub sig: Vec<u8>,
}

/// A state-channel protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Msg {
    /// Liveness probe, carrying the sender's creation timestamp in ms.
    Ping { created_ms: u64 },
    /// Answer to a [`Msg::Ping`].
    Pong { created_ms: u64 },
    /// The sender is shutting the connection down.
    Shutdown { reason: String },
    ChannelProposal(ChannelProposal),
    ChannelProposalAcc {
        proposal_id: ProposalId,
        /// Nonce share contributed by the accepting participant.
        nonce_share: [u8; 32],
    },
    ChannelProposalRej {
        proposal_id: ProposalId,
        reason: String,
    },
    ChannelUpdate(ChannelUpdate),
    ChannelUpdateAcc {
        channel_id: ChannelId,
        version: Version,
        sig: Vec<u8>,
    },
    ChannelUpdateRej {
        channel_id: ChannelId,
        version: Version,
        reason: String,
    },
    /// Resynchronisation of the latest known state after reconnecting.
    ChannelSync {
        channel_id: ChannelId,
        version: Version,
        /// Opaque encoded signed state.
        state: Vec<u8>,
    },
}

impl Msg {
    /// Kind tag of this message.
    #[must_use]
    pub fn kind(&self) -> MsgKind {
        match self {
            Self::Ping { .. } => MsgKind::Ping,
            Self::Pong { .. } => MsgKind::Pong,
            Self::Shutdown { .. } => MsgKind::Shutdown,
            Self::ChannelProposal(_) => MsgKind::ChannelProposal,
            Self::ChannelProposalAcc { .. } => MsgKind::ChannelProposalAcc,
            Self::ChannelProposalRej { .. } => MsgKind::ChannelProposalRej,
            Self::ChannelUpdate(_) => MsgKind::ChannelUpdate,
            Self::ChannelUpdateAcc { .. } => MsgKind::ChannelUpdateAcc,
            Self::ChannelUpdateRej { .. } => MsgKind::ChannelUpdateRej,
            Self::ChannelSync { .. } => MsgKind::ChannelSync,
        }
    }

    #[must_use]
    pub fn category(&self) -> MsgCategory {
        self.kind().category()
    }

    /// Channel this message refers to, if any.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Self::ChannelUpdate(update) => Some(update.channel_id),
            Self::ChannelUpdateAcc { channel_id, .. }
            | Self::ChannelUpdateRej { channel_id, .. }
            | Self::ChannelSync { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }

    /// Proposal this message refers to, if any.
    #[must_use]
    pub fn proposal_id(&self) -> Option<ProposalId> {
        match self {
            Self::ChannelProposal(proposal) => Some(proposal.proposal_id),
            Self::ChannelProposalAcc { proposal_id, .. }
            | Self::ChannelProposalRej { proposal_id, .. } => Some(*proposal_id),
            _ => None,
        }
    }
}
