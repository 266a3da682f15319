//! Book sides and raw wire levels

use serde::{Deserialize, Serialize};

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy interest (bids)
    Bid,
    /// Sell interest (asks)
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// One `[price, quantity]` pair exactly as the exchange sends it.
///
/// Kept as strings until applied so a single malformed entry can be skipped
/// without rejecting the whole frame it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLevel(pub String, pub String);

impl RawLevel {
    pub fn new(price: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self(price.into(), quantity.into())
    }

    pub fn price(&self) -> &str {
        &self.0
    }

    pub fn quantity(&self) -> &str {
        &self.1
    }
}
