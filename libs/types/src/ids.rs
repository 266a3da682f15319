//! Identifier types for hub entities
//!
//! Symbols are normalized to upper case once, at construction, so every map
//! in the hub can key on them without repeating case handling.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a connected sink (push client)
///
/// Uses UUID v7 so identifiers sort by connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(Uuid);

impl SinkId {
    /// Create a new SinkId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from the textual form sent to clients
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange symbol (e.g., "BTCUSDT")
///
/// Always stored upper-case. The exchange stream names and hub topics use
/// the lower-case form, see [`Symbol::stream_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol from a string
    ///
    /// # Panics
    /// Panics if the symbol is empty or contains non-alphanumeric characters
    pub fn new(symbol: impl AsRef<str>) -> Self {
        match Self::try_new(symbol) {
            Some(s) => s,
            None => panic!("Symbol must be a non-empty alphanumeric string"),
        }
    }

    /// Try to create a Symbol, returning None if invalid
    ///
    /// Surrounding whitespace is trimmed and the result upper-cased.
    pub fn try_new(symbol: impl AsRef<str>) -> Option<Self> {
        let s = symbol.as_ref().trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(s.to_ascii_uppercase()))
    }

    /// Parse a comma separated symbol list, skipping blanks and invalid entries
    pub fn parse_list(list: &str) -> Vec<Self> {
        let mut symbols: Vec<Self> = Vec::new();
        for symbol in list.split(',').filter_map(Self::try_new) {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        symbols
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-case form used in exchange stream names and topic keys
    pub fn stream_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_id_creation() {
        let id1 = SinkId::new();
        let id2 = SinkId::new();
        assert_ne!(id1, id2, "SinkIds should be unique");
    }

    #[test]
    fn test_sink_id_parse_roundtrip() {
        let id = SinkId::new();
        assert_eq!(SinkId::parse(&id.to_string()), Some(id));
        assert!(SinkId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn test_symbol_normalized() {
        let symbol = Symbol::new(" btcusdt ");
        assert_eq!(symbol.as_str(), "BTCUSDT");
        assert_eq!(symbol.stream_key(), "btcusdt");
    }

    #[test]
    fn test_symbol_try_new() {
        assert!(Symbol::try_new("BNBBTC").is_some());
        assert!(Symbol::try_new("").is_none());
        assert!(Symbol::try_new("BTC/USDT").is_none());
    }

    #[test]
    #[should_panic(expected = "Symbol must be a non-empty alphanumeric string")]
    fn test_symbol_invalid_format() {
        Symbol::new("BTC USDT");
    }

    #[test]
    fn test_parse_list() {
        let symbols = Symbol::parse_list("BTCUSDT, bnbbtc,, ,btcusdt");
        assert_eq!(symbols, vec![Symbol::new("BTCUSDT"), Symbol::new("BNBBTC")]);
    }

    #[test]
    fn test_symbol_serialization() {
        let symbol = Symbol::new("ETHBTC");
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"ETHBTC\"");
    }
}
