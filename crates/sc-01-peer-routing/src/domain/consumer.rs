//! Consumer identity.

use std::fmt;

use uuid::Uuid;

/// Identity of a [`Consumer`](crate::Consumer), unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first group is enough to tell consumers apart in logs
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}
