//! Query identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// 128-bit random token correlating a query with its callback.
///
/// On the wire the token is a 32 character lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryId(u128);

impl QueryId {
    /// Draw a fresh identifier from the thread-local RNG.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Build an identifier from a raw value.
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// The raw 128-bit value.
    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for QueryId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::MalformedIdentifier(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ProtocolError::MalformedIdentifier(s.to_string()))
    }
}

impl TryFrom<String> for QueryId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueryId> for String {
    fn from(id: QueryId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_fixed_width_hex() {
        let id = QueryId::from_u128(0xabc);
        assert_eq!(id.to_string(), "00000000000000000000000000000abc");
        assert_eq!(id.to_string().parse::<QueryId>().unwrap(), id);
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        assert!("abc".parse::<QueryId>().is_err());
        assert!("zz000000000000000000000000000000".parse::<QueryId>().is_err());
        assert!("+0000000000000000000000000000001".parse::<QueryId>().is_err());
    }

    #[test]
    fn test_serde_uses_hex_string() {
        let id = QueryId::from_u128(1);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::json!("00000000000000000000000000000001"));

        let back: QueryId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_value::<QueryId>(serde_json::json!(17)).is_err());
    }

    #[test]
    fn test_random_identifiers_differ() {
        let ids: std::collections::HashSet<_> = (0..64).map(|_| QueryId::random()).collect();
        assert_eq!(ids.len(), 64);
    }
}
