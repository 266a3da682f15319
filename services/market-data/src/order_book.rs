//! In-memory order book state for one symbol
//!
//! Mirrors the exchange book from snapshots and depth updates.
//! Uses `BTreeMap` so levels iterate in price order without re-sorting.
//!
//! Level changes follow exchange semantics:
//! - quantity zero → remove the price level (no-op if absent)
//! - any other quantity → insert the level or replace its quantity
//!
//! A malformed price or quantity skips that one change only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use types::book::{RawLevel, Side};
use types::errors::MessageError;
use types::ids::Symbol;
use types::numeric::{Price, Quantity};

use crate::events::{DepthUpdate, Snapshot};

/// A single price level in the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

impl PriceLevel {
    fn to_raw(&self) -> RawLevel {
        RawLevel::new(self.price.to_string(), self.quantity.to_string())
    }
}

/// Effect of one level change on the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    /// Level inserted or its quantity replaced.
    Upserted,
    /// Existing level removed by a zero quantity.
    Removed,
    /// Zero quantity for a level that was not on the book.
    Absent,
}

/// Counters for one batch of level changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub upserted: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl ApplyStats {
    fn record(&mut self, change: LevelChange) {
        match change {
            LevelChange::Upserted => self.upserted += 1,
            LevelChange::Removed => self.removed += 1,
            LevelChange::Absent => {}
        }
    }
}

/// In-memory order book for a single symbol.
///
/// Exclusively owned and mutated by that symbol's synchronizer; everything
/// else works on clones or on a [`BookView`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookState {
    /// Exchange symbol.
    pub symbol: Symbol,
    /// Bid levels: price → quantity (ascending; best bid is the last key).
    bids: BTreeMap<Price, Quantity>,
    /// Ask levels: price → quantity (ascending; best ask is the first key).
    asks: BTreeMap<Price, Quantity>,
    /// Sequence id of the last applied snapshot or update.
    last_update_id: u64,
    /// True once the first consistent update after a snapshot was applied.
    initialized: bool,
}

impl OrderBookState {
    /// Create an empty, uninitialized book.
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            initialized: false,
        }
    }

    /// Build a book seeded from a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut book = Self::new(snapshot.symbol.clone());
        book.reset_from_snapshot(snapshot);
        book
    }

    /// Replace the whole book with a snapshot.
    ///
    /// The book becomes uninitialized until the synchronizer applies a
    /// bracketing update on top of it.
    pub fn reset_from_snapshot(&mut self, snapshot: &Snapshot) -> ApplyStats {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = snapshot.last_update_id;
        self.initialized = false;

        let mut stats = self.apply_levels(Side::Bid, &snapshot.bids);
        let ask_stats = self.apply_levels(Side::Ask, &snapshot.asks);
        stats.upserted += ask_stats.upserted;
        stats.removed += ask_stats.removed;
        stats.skipped += ask_stats.skipped;
        stats
    }

    /// Apply every level change of a depth update as one unit and advance
    /// `last_update_id` to the update's final id.
    pub fn apply_update(&mut self, update: &DepthUpdate) -> ApplyStats {
        let mut stats = self.apply_levels(Side::Bid, &update.bids);
        let ask_stats = self.apply_levels(Side::Ask, &update.asks);
        stats.upserted += ask_stats.upserted;
        stats.removed += ask_stats.removed;
        stats.skipped += ask_stats.skipped;

        self.last_update_id = update.final_update_id;
        stats
    }

    /// Apply a single `[price, quantity]` change to one side.
    pub fn apply_level(&mut self, side: Side, level: &RawLevel) -> Result<LevelChange, MessageError> {
        let malformed = |reason: String| MessageError::MalformedLevel {
            side: side.as_str(),
            price: level.price().to_string(),
            quantity: level.quantity().to_string(),
            reason,
        };

        let price = Price::parse(level.price()).map_err(|e| malformed(e.to_string()))?;
        let quantity = Quantity::parse(level.quantity()).map_err(|e| malformed(e.to_string()))?;

        let levels = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        if quantity.is_zero() {
            match levels.remove(&price) {
                Some(_) => Ok(LevelChange::Removed),
                None => Ok(LevelChange::Absent),
            }
        } else {
            levels.insert(price, quantity);
            Ok(LevelChange::Upserted)
        }
    }

    fn apply_levels(&mut self, side: Side, levels: &[RawLevel]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        for level in levels {
            match self.apply_level(side, level) {
                Ok(change) => stats.record(change),
                Err(err) => {
                    stats.skipped += 1;
                    warn!(symbol = %self.symbol, error = %err, "Skipping malformed level change");
                }
            }
        }
        stats
    }

    /// Sequence id of the last applied snapshot or update.
    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    /// Get the current best bid price.
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    /// Get the current best ask price.
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    /// Quantity resting at a price, if the level exists.
    pub fn quantity_at(&self, side: Side, price: &Price) -> Option<Quantity> {
        match side {
            Side::Bid => self.bids.get(price).copied(),
            Side::Ask => self.asks.get(price).copied(),
        }
    }

    /// Number of bid price levels.
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask price levels.
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Get all bid levels (descending price order).
    pub fn bid_levels(&self) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(price, quantity)| PriceLevel {
                price: *price,
                quantity: *quantity,
            })
            .collect()
    }

    /// Get all ask levels (ascending price order).
    pub fn ask_levels(&self) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .map(|(price, quantity)| PriceLevel {
                price: *price,
                quantity: *quantity,
            })
            .collect()
    }

    /// Serializable full-book view, best levels first on both sides.
    pub fn view(&self) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            last_update_id: self.last_update_id,
            bids: self.bid_levels().iter().map(PriceLevel::to_raw).collect(),
            asks: self.ask_levels().iter().map(PriceLevel::to_raw).collect(),
        }
    }
}

/// Full book as sent to push clients and inside reset events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    pub symbol: Symbol,
    pub last_update_id: u64,
    /// Bids in descending price order (best first).
    pub bids: Vec<RawLevel>,
    /// Asks in ascending price order (best first).
    pub asks: Vec<RawLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn make_book() -> OrderBookState {
        OrderBookState::new(Symbol::new("BTCUSDT"))
    }

    fn level(price: &str, qty: &str) -> RawLevel {
        RawLevel::new(price, qty)
    }

    fn update(first: u64, last: u64, bids: Vec<RawLevel>, asks: Vec<RawLevel>) -> DepthUpdate {
        DepthUpdate {
            event_time: 1708123456789,
            symbol: Symbol::new("BTCUSDT"),
            first_update_id: first,
            final_update_id: last,
            bids,
            asks,
        }
    }

    #[test]
    fn test_empty_book() {
        let book = make_book();
        assert_eq!(book.bid_depth(), 0);
        assert_eq!(book.ask_depth(), 0);
        assert!(book.best_bid().is_none());
        assert!(book.best_ask().is_none());
        assert!(!book.is_initialized());
    }

    #[test]
    fn test_zero_quantity_removes_existing_level() {
        let mut book = make_book();
        book.apply_level(Side::Bid, &level("10.5", "1.0")).unwrap();

        let change = book.apply_level(Side::Bid, &level("10.5", "0")).unwrap();
        assert_eq!(change, LevelChange::Removed);
        assert_eq!(book.bid_depth(), 0);
    }

    #[test]
    fn test_zero_quantity_on_absent_level_is_noop() {
        let mut book = make_book();
        book.apply_level(Side::Bid, &level("10.4", "1.0")).unwrap();

        let change = book.apply_level(Side::Bid, &level("10.5", "0.00000000")).unwrap();
        assert_eq!(change, LevelChange::Absent);
        assert_eq!(book.bid_depth(), 1);
    }

    #[test]
    fn test_non_zero_quantity_inserts_then_replaces() {
        let mut book = make_book();
        let price = Price::parse("10.5").unwrap();

        book.apply_level(Side::Bid, &level("10.5", "2.3")).unwrap();
        assert_eq!(book.quantity_at(Side::Bid, &price), Some(Quantity::parse("2.3").unwrap()));

        book.apply_level(Side::Bid, &level("10.50", "4")).unwrap();
        assert_eq!(book.bid_depth(), 1);
        assert_eq!(book.quantity_at(Side::Bid, &price), Some(Quantity::parse("4").unwrap()));
    }

    #[test]
    fn test_malformed_quantity_skips_only_that_change() {
        let mut book = make_book();
        let stats = book.apply_update(&update(
            1,
            3,
            vec![level("100", "abc"), level("99", "1")],
            vec![level("101", "2")],
        ));

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.upserted, 2);
        assert_eq!(book.bid_depth(), 1);
        assert_eq!(book.ask_depth(), 1);
        assert_eq!(book.last_update_id(), 3);
    }

    #[test]
    fn test_best_bid_ask_ordering() {
        let mut book = make_book();
        for (price, qty) in [("49000", "1"), ("50000", "1"), ("49500", "1")] {
            book.apply_level(Side::Bid, &level(price, qty)).unwrap();
        }
        for (price, qty) in [("51000", "1"), ("52000", "1"), ("50500", "1")] {
            book.apply_level(Side::Ask, &level(price, qty)).unwrap();
        }

        assert_eq!(book.best_bid(), Some(Price::from_u64(50000)));
        assert_eq!(book.best_ask(), Some(Price::parse("50500").unwrap()));

        let bids = book.bid_levels();
        assert!(bids[0].price > bids[1].price);
        let asks = book.ask_levels();
        assert!(asks[0].price < asks[1].price);
    }

    #[test]
    fn test_reset_from_snapshot_replaces_everything() {
        let mut book = make_book();
        book.apply_level(Side::Ask, &level("70000", "1")).unwrap();
        book.set_initialized(true);

        let snapshot = Snapshot {
            symbol: Symbol::new("BTCUSDT"),
            last_update_id: 1000,
            bids: vec![level("100", "1"), level("99", "0")],
            asks: vec![level("101", "2")],
        };
        book.reset_from_snapshot(&snapshot);

        assert_eq!(book.last_update_id(), 1000);
        assert!(!book.is_initialized());
        assert_eq!(book.bid_depth(), 1);
        assert_eq!(book.ask_depth(), 1);
        assert_eq!(book.best_ask(), Some(Price::from_u64(101)));
    }

    #[test]
    fn test_view_serialization_shape() {
        let mut book = make_book();
        book.apply_level(Side::Bid, &level("10.00", "1.5")).unwrap();
        book.apply_level(Side::Bid, &level("11.00", "2")).unwrap();

        let json = serde_json::to_value(book.view()).unwrap();
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["lastUpdateId"], 0);
        assert_eq!(json["bids"][0][0], "11.00");
        assert_eq!(json["bids"][1][1], "1.5");
        assert!(json["asks"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut book = make_book();
        book.apply_level(Side::Bid, &level("10", "1")).unwrap();

        let mut copy = book.clone();
        copy.apply_level(Side::Bid, &level("10", "0")).unwrap();

        assert_eq!(book.bid_depth(), 1);
        assert_eq!(copy.bid_depth(), 0);
    }

    proptest! {
        #[test]
        fn prop_book_matches_model(changes in proptest::collection::vec((1u32..20, 0u32..4), 0..200)) {
            let mut book = make_book();
            let mut model: HashMap<u32, u32> = HashMap::new();

            for (price, qty) in &changes {
                book.apply_level(Side::Ask, &level(&price.to_string(), &qty.to_string())).unwrap();
                if *qty == 0 {
                    model.remove(price);
                } else {
                    model.insert(*price, *qty);
                }
            }

            prop_assert_eq!(book.ask_depth(), model.len());
            for lvl in book.ask_levels() {
                prop_assert!(!lvl.quantity.is_zero());
            }
            for (price, qty) in &model {
                let stored = book.quantity_at(Side::Ask, &Price::from_u64(*price as u64));
                prop_assert_eq!(stored, Some(Quantity::parse(&qty.to_string()).unwrap()));
            }
        }
    }
}
