//! # Envelope
//!
//! The unit the routing layer moves between participants.
//!
//! The `sender` is the identity the carrying connection was authenticated
//! as; consumers trust it over anything inside the payload.

use serde::{Deserialize, Serialize};

use crate::entities::Address;
use crate::message::{Msg, MsgKind};

/// A message addressed from one participant to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Authenticated identity of the sender.
    pub sender: Address,
    /// Intended recipient.
    pub recipient: Address,
    /// The protocol message.
    pub msg: Msg,
}

impl Envelope {
    #[must_use]
    pub fn new(sender: Address, recipient: Address, msg: Msg) -> Self {
        Self {
            sender,
            recipient,
            msg,
        }
    }

    /// Shorthand for `self.msg.kind()`.
    #[must_use]
    pub fn kind(&self) -> MsgKind {
        self.msg.kind()
    }
}
