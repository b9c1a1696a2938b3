//! Identifier types for ledger accounts and submitted operations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Length of an account address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Errors produced when parsing an [`Address`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AddressError {
    /// The input was not valid hexadecimal.
    #[error("invalid hex in address: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The input decoded to the wrong number of bytes.
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),
}

/// Public address of a ledger account.
///
/// Fixed-width and opaque: the ledger never derives or allocates addresses,
/// it only keys balances by them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Create an address from raw bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Build an address from the leading bytes of a longer digest.
    pub fn from_digest(digest: &[u8]) -> Result<Self, AddressError> {
        if digest.len() < ADDRESS_LEN {
            return Err(AddressError::InvalidLength(digest.len()));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
        Ok(Self(bytes))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let decoded = hex::decode(trimmed)?;
        if decoded.len() != ADDRESS_LEN {
            return Err(AddressError::InvalidLength(decoded.len()));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Unique identifier for a submitted operation.
/// Uses UUID v7 so ids sort by submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new operation ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826";

    #[test]
    fn test_address_display_roundtrip() {
        let addr: Address = ALICE.parse().unwrap();
        assert_eq!(addr.to_string(), ALICE);
    }

    #[test]
    fn test_address_parse_variants() {
        let lower: Address = ALICE.parse().unwrap();
        let upper: Address = "0XCD2A3D9F938E13CD947EC05ABC7FE734DF8DD826".parse().unwrap();
        let bare: Address = "cd2a3d9f938e13cd947ec05abc7fe734df8dd826".parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower, bare);
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert_eq!(
            "0xdeadbeef".parse::<Address>(),
            Err(AddressError::InvalidLength(4))
        );
        assert!(matches!(
            "0xzz2a3d9f938e13cd947ec05abc7fe734df8dd826".parse::<Address>(),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_address_serde_as_hex_string() {
        let addr: Address = ALICE.parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{ALICE}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_operation_id_creation() {
        let id1 = OperationId::new();
        let id2 = OperationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_operation_id_parse() {
        let uuid_str = "019456ab-1234-7def-8901-234567890abc";
        let id = OperationId::parse(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }
}
