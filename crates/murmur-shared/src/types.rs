use serde::{Deserialize, Serialize};

use crate::constants::ADDRESS_SIZE;

/// Ledger post identifier. Assigned sequentially by the ledger starting at 1.
pub type PostId = u64;

/// `reply_to` value marking a root post (no parent).
pub const NO_PARENT: PostId = 0;

// Ledger account address (20 bytes)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != ADDRESS_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; ADDRESS_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        let full = self.to_hex();
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Content-derived blob identifier.
///
/// Identical bytes always produce the identical identifier, so a given
/// id resolves to the same payload forever. This is what licenses the
/// permanent caching in `murmur-content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether a read was answered from cache or by hitting the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// Fetched from the underlying data plane during this call.
    Fresh,
    /// Served from a previously populated cache entry.
    Cached,
}

/// A read result paired with its staleness indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub freshness: Freshness,
}

impl<T> Fetched<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            freshness: Freshness::Fresh,
        }
    }

    pub fn cached(value: T) -> Self {
        Self {
            value,
            freshness: Freshness::Cached,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.freshness == Freshness::Cached
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            freshness: self.freshness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_round_trip() {
        let addr = Address([0xab; ADDRESS_SIZE]);
        let hex = addr.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
    }

    #[test]
    fn test_address_from_hex_without_prefix() {
        let addr = Address([7; ADDRESS_SIZE]);
        let bare = addr.to_hex().trim_start_matches("0x").to_string();
        assert_eq!(Address::from_hex(&bare).unwrap(), addr);
    }

    #[test]
    fn test_address_from_hex_rejects_wrong_length() {
        assert!(Address::from_hex("0xdeadbeef").is_err());
    }

    #[test]
    fn test_short_format() {
        let addr = Address([0x12; ADDRESS_SIZE]);
        let short = addr.short();
        assert!(short.starts_with("0x1212"));
        assert!(short.ends_with("1212"));
    }
}
