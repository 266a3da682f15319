//! Wire and domain event definitions
//!
//! Three families live here:
//! - exchange frames (`DepthUpdate`, snapshot bodies, subscription acks)
//! - domain events published on the bus (`DomainEvent`)
//! - the frames those events carry to push clients

use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::book::RawLevel;
use types::errors::MessageError;
use types::ids::Symbol;

use crate::order_book::BookView;

/// Reason carried by every reset event raised by gap detection.
pub const DESYNC_REASON: &str = "desync detected";

/// One incremental depth change as sent by the exchange.
///
/// Wire shape: `{e:"depthUpdate", E, s, U, u, b:[[p,q]..], a:[[p,q]..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "E", default)]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b", default)]
    pub bids: Vec<RawLevel>,
    #[serde(rename = "a", default)]
    pub asks: Vec<RawLevel>,
}

impl DepthUpdate {
    /// Bracket test against a snapshot id: `U ≤ id + 1 ≤ u`.
    pub fn brackets(&self, snapshot_id: u64) -> bool {
        let next = snapshot_id.saturating_add(1);
        self.first_update_id <= next && next <= self.final_update_id
    }
}

/// Body of `GET /depth` before it is tagged with a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    pub last_update_id: u64,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
}

/// Full point-in-time book fetched out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub symbol: Symbol,
    pub last_update_id: u64,
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
}

impl Snapshot {
    pub fn from_body(symbol: Symbol, body: SnapshotBody) -> Self {
        Self {
            symbol,
            last_update_id: body.last_update_id,
            bids: body.bids,
            asks: body.asks,
        }
    }
}

/// A classified inbound exchange frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    /// Reply to a SUBSCRIBE request.
    Ack { id: Value },
    Depth(DepthUpdate),
    /// Anything else; ignored by the feed.
    Other,
}

/// Classify one text frame from the exchange stream.
///
/// Combined-stream envelopes `{stream, data}` are unwrapped first.
pub fn parse_feed_frame(text: &str) -> Result<FeedFrame, MessageError> {
    let mut value: Value =
        serde_json::from_str(text).map_err(|e| MessageError::InvalidJson(e.to_string()))?;

    if value.get("stream").is_some() {
        if let Some(data) = value.get_mut("data") {
            value = data.take();
        }
    }

    if value.get("e").and_then(Value::as_str) == Some("depthUpdate") {
        let update: DepthUpdate = serde_json::from_value(value)
            .map_err(|e| MessageError::InvalidJson(e.to_string()))?;
        return Ok(FeedFrame::Depth(update));
    }

    if let Some(id) = value.get("id") {
        if value.get("result").is_some() || value.get("error").is_none() {
            return Ok(FeedFrame::Ack { id: id.clone() });
        }
    }

    Ok(FeedFrame::Other)
}

/// Topic carrying depth events for a symbol (`btcusdt@depth`).
pub fn depth_topic(symbol: &Symbol) -> String {
    format!("{}@depth", symbol.stream_key())
}

/// Topic carrying reset events for a symbol (`btcusdt@depth.reset`).
pub fn reset_topic(symbol: &Symbol) -> String {
    format!("{}@depth.reset", symbol.stream_key())
}

/// Kind of a published domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    #[serde(rename = "depthUpdate")]
    DepthUpdate,
    #[serde(rename = "orderbook_reset")]
    OrderBookReset,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::DepthUpdate => "depthUpdate",
            EventAction::OrderBookReset => "orderbook_reset",
        }
    }
}

/// Depth event as published on `<symbol>@depth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthEventFrame {
    pub action: EventAction,
    pub symbol: Symbol,
    pub event_time: u64,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids_changed: Vec<RawLevel>,
    pub asks_changed: Vec<RawLevel>,
}

impl From<&DepthUpdate> for DepthEventFrame {
    fn from(update: &DepthUpdate) -> Self {
        Self {
            action: EventAction::DepthUpdate,
            symbol: update.symbol.clone(),
            event_time: update.event_time,
            first_update_id: update.first_update_id,
            final_update_id: update.final_update_id,
            bids_changed: update.bids.clone(),
            asks_changed: update.asks.clone(),
        }
    }
}

/// Reset event as published on `<symbol>@depth.reset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetEventFrame {
    pub symbol: Symbol,
    pub snapshot: BookView,
    pub reason: String,
    /// Unix seconds.
    pub timestamp: i64,
}

impl ResetEventFrame {
    pub fn new(snapshot: BookView, reason: &str) -> Self {
        Self {
            symbol: snapshot.symbol.clone(),
            snapshot,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Payload of a domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Depth(DepthEventFrame),
    Reset(ResetEventFrame),
}

/// Event delivered by the bus to every handler of its topic.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub action: EventAction,
    pub topic: String,
    pub payload: EventPayload,
}
