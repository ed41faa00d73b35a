//! Shared identifier wrappers for Phloem.
//!
//! All identifiers are opaque 16-byte values. Each type carries an `INVALID`
//! sentinel (the nil UUID) that is distinct from every generated id and is
//! used as the "not found / not assigned" return value across the allocator.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_binary_id {
    ($name:ident, $label:expr) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Sentinel value distinct from every valid id.
            pub const INVALID: Self = Self(Uuid::nil());

            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Builds an id from raw bytes. Mostly useful for tests and for
            /// peers that generate their own identities.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub const fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            pub fn is_valid(&self) -> bool {
                *self != Self::INVALID
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                let uuid = Uuid::parse_str(value)
                    .map_err(|e| IdParseError::new(format!("Invalid {}: {}", $label, e)))?;
                Ok(Self(uuid))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_binary_id!(TaskId, "task ID");
define_binary_id!(WorkerId, "worker ID");
define_binary_id!(ObjectId, "object ID");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sentinel() {
        assert!(!TaskId::INVALID.is_valid());
        assert!(TaskId::new().is_valid());
        assert_ne!(TaskId::new(), TaskId::INVALID);
        assert_eq!(TaskId::from_bytes([0u8; 16]), TaskId::INVALID);
    }

    #[test]
    fn test_byte_wise_ordering() {
        let low = WorkerId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let high = WorkerId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        assert!(low < high);
        assert!(WorkerId::INVALID < low);
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = ObjectId::new();
        let parsed = ObjectId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);

        assert!(ObjectId::parse("not-a-uuid").is_err());
    }
}
