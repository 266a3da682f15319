//! Error types for the market data hub
//!
//! Comprehensive error taxonomy using thiserror. Each enum is one class of
//! failure with its own handling policy; none of them is fatal to the process.

use thiserror::Error;

/// Top-level hub error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Snapshot fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Malformed message: {0}")]
    Message(#[from] MessageError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Numeric error: {0}")]
    Numeric(#[from] NumericError),
}

/// Transient stream-side failures. The feed reconnects and resubscribes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("connection closed by peer")]
    Closed,
}

/// Transient snapshot-side failures. Resyncs retry with backoff.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable snapshot body: {0}")]
    Decode(String),

    #[error("snapshot fetch aborted")]
    Aborted,
}

/// Synchronization failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Drives a resync; surfaced to subscribers as a reset event only.
    #[error("sequence gap on {symbol}: expected {expected}, got {got}")]
    ConsistencyGap { symbol: String, expected: u64, got: u64 },

    /// Halts the symbol permanently.
    #[error("initial snapshot for {symbol} failed after {attempts} attempt(s): {reason}")]
    InitialSnapshot {
        symbol: String,
        attempts: u32,
        reason: String,
    },
}

/// An unparsable unit (one frame, or one level change). The unit is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("malformed {side} level [{price}, {quantity}]: {reason}")]
    MalformedLevel {
        side: &'static str,
        price: String,
        quantity: String,
        reason: String,
    },
}

/// Push-protocol rejections. Reported to the client; the connection stays open.
///
/// Display strings are sent verbatim in `{success:false, error}` frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Invalid payload or missing topic")]
    MissingTopic,

    #[error("Invalid topic format. Expect <symbol>@<event>")]
    InvalidTopic(String),

    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("unknown action")]
    UnknownMethod(String),

    #[error("Sink not registered: {0}")]
    SinkNotFound(String),

    #[error("Max subscriptions ({0}) reached")]
    SubscriptionLimit(usize),
}

/// Synchronous snapshot query failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("orderbook not found: {0}")]
    NotFound(String),
}

/// Decimal parsing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("invalid decimal {value:?}: {reason}")]
    Invalid { value: String, reason: String },

    #[error("negative value not allowed: {0}")]
    Negative(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_error_display() {
        let err = RegistrationError::UnknownSymbol("ZZZUSD".to_string());
        assert_eq!(err.to_string(), "Unknown symbol: ZZZUSD");
        assert_eq!(
            RegistrationError::UnsupportedEvent("trades".to_string()).to_string(),
            "Unsupported event type: trades"
        );
    }

    #[test]
    fn test_sync_error_gap_display() {
        let err = SyncError::ConsistencyGap {
            symbol: "BTCUSDT".to_string(),
            expected: 1008,
            got: 1009,
        };
        assert!(err.to_string().contains("expected 1008"));
        assert!(err.to_string().contains("got 1009"));
    }

    #[test]
    fn test_hub_error_from_fetch_error() {
        let fetch_err = FetchError::Status {
            status: 429,
            body: "too many requests".to_string(),
        };
        let hub_err: HubError = fetch_err.into();
        assert!(matches!(hub_err, HubError::Fetch(_)));
    }
}
