//! Snapshot store and query surface
//!
//! Holds the latest copy of every symbol's book. Synchronizers replace
//! their entry after each accepted delta; readers always receive their own
//! copy, so nothing outside a synchronizer ever aliases live book state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use types::errors::QueryError;
use types::ids::Symbol;
use types::numeric::{Price, Quantity};

use crate::order_book::{OrderBookState, PriceLevel};

/// Concurrent `symbol → book copy` map.
///
/// Entries are stored behind `Arc` so a write swaps a pointer and readers
/// clone outside the lock.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    books: RwLock<BTreeMap<Symbol, Arc<OrderBookState>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for the book's symbol.
    pub fn set_item(&self, book: OrderBookState) {
        let symbol = book.symbol.clone();
        self.books.write().insert(symbol, Arc::new(book));
    }

    /// Independent copy of one book.
    pub fn get_item(&self, symbol: &Symbol) -> Option<OrderBookState> {
        let entry = self.books.read().get(symbol).cloned();
        entry.map(|book| (*book).clone())
    }

    /// Independent copies of every book, in symbol order.
    pub fn get_all(&self) -> Vec<OrderBookState> {
        let entries: Vec<Arc<OrderBookState>> = self.books.read().values().cloned().collect();
        entries.into_iter().map(|book| (*book).clone()).collect()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.books.read().contains_key(symbol)
    }

    pub fn delete_item(&self, symbol: &Symbol) -> bool {
        self.books.write().remove(symbol).is_some()
    }

    pub fn clear(&self) {
        self.books.write().clear();
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Synchronous snapshot query.
    pub fn query(&self, symbol: &Symbol) -> Result<SnapshotReply, QueryError> {
        self.get_item(symbol)
            .map(|book| SnapshotReply::from(&book))
            .ok_or_else(|| QueryError::NotFound(symbol.to_string()))
    }
}

/// One level in a query reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEntry {
    pub price: Price,
    pub amount: Quantity,
}

impl From<PriceLevel> for LevelEntry {
    fn from(level: PriceLevel) -> Self {
        Self {
            price: level.price,
            amount: level.quantity,
        }
    }
}

/// `{symbol, lastUpdateId, bids:[{price,amount}], asks:[{price,amount}]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReply {
    pub symbol: Symbol,
    pub last_update_id: u64,
    pub bids: Vec<LevelEntry>,
    pub asks: Vec<LevelEntry>,
}

impl From<&OrderBookState> for SnapshotReply {
    fn from(book: &OrderBookState) -> Self {
        Self {
            symbol: book.symbol.clone(),
            last_update_id: book.last_update_id(),
            bids: book.bid_levels().into_iter().map(LevelEntry::from).collect(),
            asks: book.ask_levels().into_iter().map(LevelEntry::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::book::{RawLevel, Side};

    fn book(symbol: &str, id: u64) -> OrderBookState {
        let mut book = OrderBookState::new(Symbol::new(symbol));
        book.apply_level(Side::Bid, &RawLevel::new("100", "1")).unwrap();
        book.apply_level(Side::Ask, &RawLevel::new("101", "2")).unwrap();
        let snapshot = crate::events::Snapshot {
            symbol: Symbol::new(symbol),
            last_update_id: id,
            bids: vec![RawLevel::new("100", "1")],
            asks: vec![RawLevel::new("101", "2")],
        };
        book.reset_from_snapshot(&snapshot);
        book
    }

    #[test]
    fn test_set_and_get() {
        let store = SnapshotStore::new();
        store.set_item(book("BTCUSDT", 10));

        let copy = store.get_item(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(copy.last_update_id(), 10);
        assert!(store.get_item(&Symbol::new("ETHUSDT")).is_none());
    }

    #[test]
    fn test_returned_copy_is_independent() {
        let store = SnapshotStore::new();
        store.set_item(book("BTCUSDT", 10));

        let mut copy = store.get_item(&Symbol::new("BTCUSDT")).unwrap();
        copy.apply_level(Side::Bid, &RawLevel::new("100", "0")).unwrap();

        let stored = store.get_item(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(stored.bid_depth(), 1);
        assert_eq!(copy.bid_depth(), 0);
    }

    #[test]
    fn test_stored_value_is_independent_of_source() {
        let store = SnapshotStore::new();
        let mut source = book("BTCUSDT", 10);
        store.set_item(source.clone());

        source.apply_level(Side::Ask, &RawLevel::new("101", "0")).unwrap();
        assert_eq!(store.get_item(&Symbol::new("BTCUSDT")).unwrap().ask_depth(), 1);
    }

    #[test]
    fn test_get_all_delete_clear() {
        let store = SnapshotStore::new();
        store.set_item(book("ETHUSDT", 1));
        store.set_item(book("BTCUSDT", 2));

        let all = store.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].symbol.as_str(), "BTCUSDT");

        assert!(store.delete_item(&Symbol::new("ETHUSDT")));
        assert!(!store.delete_item(&Symbol::new("ETHUSDT")));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_query_shape() {
        let store = SnapshotStore::new();
        store.set_item(book("BTCUSDT", 42));

        let reply = store.query(&Symbol::new("BTCUSDT")).unwrap();
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["lastUpdateId"], 42);
        assert_eq!(json["bids"][0]["price"], "100");
        assert_eq!(json["asks"][0]["amount"], "2");
    }

    #[test]
    fn test_query_not_found() {
        let store = SnapshotStore::new();
        let err = store.query(&Symbol::new("ZZZUSD")).unwrap_err();
        assert_eq!(err, QueryError::NotFound("ZZZUSD".to_string()));
    }
}
