//! # Core Identities
//!
//! Identity values used as routing keys and correlation keys.
//!
//! ## Clusters
//!
//! - **Participants**: `Address`
//! - **Channels**: `ChannelId`, `ProposalId`, `Version`

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::AddressParseError;

// =============================================================================
// CLUSTER A: PARTICIPANTS
// =============================================================================

/// Length of an [`Address`] in bytes.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte participant identity.
///
/// The routing layer uses it only as a lookup key: it is compared, hashed
/// and serialized, never interpreted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Create an address from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a random address (tests and tooling).
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; ADDRESS_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes of the address.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Short form used in log lines (first 4 bytes).
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", self.short())
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| AddressParseError::InvalidHex(e.to_string()))?;
        let array: [u8; ADDRESS_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| AddressParseError::InvalidLength {
                    expected: ADDRESS_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }
}

// =============================================================================
// CLUSTER B: CHANNELS
// =============================================================================

/// A 32-byte channel identifier.
pub type ChannelId = [u8; 32];

/// A 32-byte channel proposal identifier.
pub type ProposalId = [u8; 32];

/// Monotonic version number of a channel state.
pub type Version = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_roundtrip() {
        let addr = Address::new([0xab; ADDRESS_LEN]);
        let text = addr.to_string();
        assert!(text.starts_with("0xabab"));
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_parse_without_prefix() {
        let addr: Address = "0102030405060708090a0b0c0d0e0f1011121314".parse().unwrap();
        assert_eq!(addr.as_bytes()[0], 1);
        assert_eq!(addr.as_bytes()[19], 0x14);
    }

    #[test]
    fn test_address_parse_rejects_wrong_length() {
        let result = "0x0102".parse::<Address>();
        assert_eq!(
            result,
            Err(AddressParseError::InvalidLength {
                expected: ADDRESS_LEN,
                actual: 2
            })
        );
    }

    #[test]
    fn test_address_parse_rejects_bad_hex() {
        assert!(matches!(
            "0xzz".parse::<Address>(),
            Err(AddressParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_random_addresses_differ() {
        assert_ne!(Address::random(), Address::random());
    }

    #[test]
    fn test_short_form() {
        let addr = Address::new([0x12; ADDRESS_LEN]);
        assert_eq!(addr.short(), "12121212");
        assert_eq!(format!("{addr:?}"), "Address(0x12121212)");
    }
}
