//! Client push protocol
//!
//! Requests: `{method:"subscribe"|"unsubscribe", params:{topic:"<symbol>@<event>"}}`.
//! Replies and broadcasts share one frame shape, `{method?, success?, error?,
//! topic?, data?}`, with absent fields omitted.
//!
//! Flow: subscribe → full book in the reply → depth events → reset events
//! whenever the book had to be resynchronized.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use types::errors::RegistrationError;
use types::ids::{SinkId, Symbol};

use crate::events::{depth_topic, reset_topic};
use crate::registry::SubscriptionRegistry;
use crate::snapshot::SnapshotStore;

/// Event kinds a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicEvent {
    Depth,
}

impl TopicEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicEvent::Depth => "depth",
        }
    }
}

/// A parsed `<symbol>@<event>` topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub symbol: Symbol,
    pub event: TopicEvent,
}

impl Topic {
    /// Parse a client topic. The symbol is case-insensitive, the event is
    /// lower-cased before matching.
    pub fn parse(s: &str) -> Result<Self, RegistrationError> {
        let parts: Vec<&str> = s.split('@').collect();
        let [symbol, event] = parts.as_slice() else {
            return Err(RegistrationError::InvalidTopic(s.to_string()));
        };

        let symbol = Symbol::try_new(symbol)
            .ok_or_else(|| RegistrationError::InvalidTopic(s.to_string()))?;

        match event.to_ascii_lowercase().as_str() {
            "depth" => Ok(Topic {
                symbol,
                event: TopicEvent::Depth,
            }),
            other => Err(RegistrationError::UnsupportedEvent(other.to_string())),
        }
    }

    /// Registry keys this topic enrols a sink in.
    pub fn registry_keys(&self) -> [String; 2] {
        match self.event {
            TopicEvent::Depth => [depth_topic(&self.symbol), reset_topic(&self.symbol)],
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.event.as_str())
    }
}

/// Inbound client request.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Outbound frame for replies and broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame<D = Value> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<D>,
}

impl<D> PushFrame<D> {
    /// Broadcast frame carrying an event payload.
    pub fn event(method: Option<&str>, data: D) -> Self {
        Self {
            method: method.map(str::to_string),
            success: None,
            error: None,
            topic: None,
            data: Some(data),
        }
    }
}

impl PushFrame {
    pub fn failure(method: &str, error: &RegistrationError) -> Self {
        Self {
            method: Some(method.to_string()),
            success: Some(false),
            error: Some(error.to_string()),
            topic: None,
            data: None,
        }
    }

    fn ok(method: &str, topic: String, data: Option<Value>) -> Self {
        Self {
            method: Some(method.to_string()),
            success: Some(true),
            error: None,
            topic: Some(topic),
            data,
        }
    }
}

/// Greeting sent to a sink right after it connects.
pub fn hello_message(sink_id: SinkId) -> String {
    serde_json::json!({ "client_id": sink_id.to_string() }).to_string()
}

/// Routes client requests to the registry and the snapshot store.
pub struct PushProtocol {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<SnapshotStore>,
}

impl PushProtocol {
    pub fn new(registry: Arc<SubscriptionRegistry>, store: Arc<SnapshotStore>) -> Self {
        Self { registry, store }
    }

    /// Handle one text frame from a sink.
    ///
    /// Returns the reply to send back, or `None` for unparsable input.
    pub fn handle_text(&self, sink_id: SinkId, text: &str) -> Option<PushFrame> {
        let request: ClientRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(err) => {
                warn!(sink_id = %sink_id, error = %err, "Invalid client payload, skipped");
                return None;
            }
        };
        debug!(sink_id = %sink_id, method = %request.method, "Client request");
        Some(self.handle(sink_id, &request))
    }

    pub fn handle(&self, sink_id: SinkId, request: &ClientRequest) -> PushFrame {
        match request.method.to_ascii_lowercase().as_str() {
            "subscribe" => self
                .subscribe(sink_id, &request.params)
                .unwrap_or_else(|err| PushFrame::failure("subscribe", &err)),
            "unsubscribe" => self
                .unsubscribe(sink_id, &request.params)
                .unwrap_or_else(|err| PushFrame::failure("unsubscribe", &err)),
            _ => PushFrame::failure(
                &request.method,
                &RegistrationError::UnknownMethod(request.method.clone()),
            ),
        }
    }

    fn subscribe(&self, sink_id: SinkId, params: &Value) -> Result<PushFrame, RegistrationError> {
        let raw = topic_param(params)?;
        let topic = Topic::parse(raw)?;

        if !self.store.contains(&topic.symbol) {
            return Err(RegistrationError::UnknownSymbol(topic.symbol.to_string()));
        }

        // Join the topics before copying the book: an update applied in
        // between then reaches the sink (as stale) instead of being lost.
        let [depth_key, reset_key] = topic.registry_keys();
        let added_depth = self.registry.subscribe(sink_id, &depth_key)?;
        if let Err(err) = self.registry.subscribe(sink_id, &reset_key) {
            if added_depth {
                self.roll_back(sink_id, &[&depth_key]);
            }
            return Err(err);
        }

        let Some(book) = self.store.get_item(&topic.symbol) else {
            self.roll_back(sink_id, &[&depth_key, &reset_key]);
            return Err(RegistrationError::UnknownSymbol(topic.symbol.to_string()));
        };

        let data = serde_json::to_value(book.view()).ok();
        Ok(PushFrame::ok("subscribe", topic.to_string(), data))
    }

    fn roll_back(&self, sink_id: SinkId, keys: &[&str]) {
        for key in keys {
            if let Err(err) = self.registry.unsubscribe(sink_id, key) {
                debug!(%sink_id, topic = %key, error = %err, "Subscription rollback failed");
            }
        }
    }

    fn unsubscribe(&self, sink_id: SinkId, params: &Value) -> Result<PushFrame, RegistrationError> {
        let raw = topic_param(params)?;

        match Topic::parse(raw) {
            Ok(topic) => {
                for key in topic.registry_keys() {
                    self.registry.unsubscribe(sink_id, &key)?;
                }
            }
            Err(_) => {
                self.registry
                    .unsubscribe(sink_id, &raw.to_ascii_lowercase())?;
            }
        }
        Ok(PushFrame::ok("unsubscribe", raw.to_string(), None))
    }
}

fn topic_param(params: &Value) -> Result<&str, RegistrationError> {
    params
        .get("topic")
        .and_then(Value::as_str)
        .filter(|topic| !topic.is_empty())
        .ok_or(RegistrationError::MissingTopic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HubMetrics;
    use crate::order_book::OrderBookState;
    use crate::registry::RegistryConfig;
    use std::net::SocketAddr;

    fn setup() -> (PushProtocol, Arc<SubscriptionRegistry>, SinkId) {
        setup_with(RegistryConfig::default())
    }

    fn setup_with(config: RegistryConfig) -> (PushProtocol, Arc<SubscriptionRegistry>, SinkId) {
        let registry = Arc::new(SubscriptionRegistry::new(config, Arc::new(HubMetrics::new())));
        let store = Arc::new(SnapshotStore::new());
        let snapshot = crate::events::Snapshot {
            symbol: Symbol::new("BTCUSDT"),
            last_update_id: 1000,
            bids: vec![types::book::RawLevel::new("100", "1")],
            asks: vec![types::book::RawLevel::new("101", "2")],
        };
        store.set_item(OrderBookState::from_snapshot(&snapshot));

        let sink = registry.new_sink(SocketAddr::from(([127, 0, 0, 1], 9000)));
        let protocol = PushProtocol::new(registry.clone(), store);
        (protocol, registry, sink.id())
    }

    #[test]
    fn test_topic_parse() {
        let topic = Topic::parse("btcusdt@DEPTH").unwrap();
        assert_eq!(topic.symbol.as_str(), "BTCUSDT");
        assert_eq!(topic.to_string(), "BTCUSDT@depth");
        assert_eq!(
            topic.registry_keys(),
            ["btcusdt@depth".to_string(), "btcusdt@depth.reset".to_string()]
        );

        assert!(matches!(Topic::parse("btcusdt"), Err(RegistrationError::InvalidTopic(_))));
        assert!(matches!(Topic::parse("a@b@c"), Err(RegistrationError::InvalidTopic(_))));
        assert_eq!(
            Topic::parse("btcusdt@trades"),
            Err(RegistrationError::UnsupportedEvent("trades".to_string()))
        );
    }

    #[test]
    fn test_subscribe_known_symbol_returns_book() {
        let (protocol, registry, sink) = setup();

        let reply = protocol
            .handle_text(sink, r#"{"method":"subscribe","params":{"topic":"BTCUSDT@depth"}}"#)
            .unwrap();

        assert_eq!(reply.success, Some(true));
        assert_eq!(reply.method.as_deref(), Some("subscribe"));
        assert_eq!(reply.topic.as_deref(), Some("BTCUSDT@depth"));
        let data = reply.data.unwrap();
        assert_eq!(data["lastUpdateId"], 1000);
        assert_eq!(data["bids"][0][0], "100");

        assert_eq!(registry.subscribers("btcusdt@depth"), vec![sink]);
        assert_eq!(registry.subscribers("btcusdt@depth.reset"), vec![sink]);
    }

    #[test]
    fn test_subscribe_unknown_symbol() {
        let (protocol, registry, sink) = setup();

        let reply = protocol
            .handle_text(sink, r#"{"method":"subscribe","params":{"topic":"ZZZUSD@depth"}}"#)
            .unwrap();

        assert_eq!(reply.success, Some(false));
        assert_eq!(reply.error.as_deref(), Some("Unknown symbol: ZZZUSD"));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_subscription_limit_rolls_back_depth_topic() {
        let (protocol, registry, sink) = setup_with(RegistryConfig {
            max_subscriptions_per_sink: 1,
            ..RegistryConfig::default()
        });

        let reply = protocol
            .handle_text(sink, r#"{"method":"subscribe","params":{"topic":"btcusdt@depth"}}"#)
            .unwrap();

        assert_eq!(reply.success, Some(false));
        assert_eq!(reply.error.as_deref(), Some("Max subscriptions (1) reached"));
        assert!(reply.data.is_none());
        assert!(registry.subscribers("btcusdt@depth").is_empty());
        assert!(registry.subscribers("btcusdt@depth.reset").is_empty());
    }

    #[test]
    fn test_missing_topic_and_bad_format() {
        let (protocol, _, sink) = setup();

        let reply = protocol
            .handle_text(sink, r#"{"method":"subscribe","params":{}}"#)
            .unwrap();
        assert_eq!(reply.error.as_deref(), Some("Invalid payload or missing topic"));

        let reply = protocol
            .handle_text(sink, r#"{"method":"unsubscribe"}"#)
            .unwrap();
        assert_eq!(reply.method.as_deref(), Some("unsubscribe"));
        assert_eq!(reply.error.as_deref(), Some("Invalid payload or missing topic"));

        let reply = protocol
            .handle_text(sink, r#"{"method":"subscribe","params":{"topic":"btcusdt"}}"#)
            .unwrap();
        assert_eq!(
            reply.error.as_deref(),
            Some("Invalid topic format. Expect <symbol>@<event>")
        );
    }

    #[test]
    fn test_unknown_method() {
        let (protocol, _, sink) = setup();
        let reply = protocol
            .handle_text(sink, r#"{"method":"publish","params":{"topic":"btcusdt@depth"}}"#)
            .unwrap();
        assert_eq!(reply.success, Some(false));
        assert_eq!(reply.error.as_deref(), Some("unknown action"));
    }

    #[test]
    fn test_unsubscribe_leaves_both_topics() {
        let (protocol, registry, sink) = setup();
        protocol.handle_text(sink, r#"{"method":"subscribe","params":{"topic":"btcusdt@depth"}}"#);

        let reply = protocol
            .handle_text(sink, r#"{"method":"UNSUBSCRIBE","params":{"topic":"btcusdt@depth"}}"#)
            .unwrap();

        assert_eq!(reply.success, Some(true));
        assert_eq!(reply.topic.as_deref(), Some("btcusdt@depth"));
        assert!(registry.subscribers("btcusdt@depth").is_empty());
        assert!(registry.subscribers("btcusdt@depth.reset").is_empty());
    }

    #[test]
    fn test_invalid_json_is_skipped() {
        let (protocol, _, sink) = setup();
        assert!(protocol.handle_text(sink, "not json").is_none());
    }

    #[test]
    fn test_frame_omits_absent_fields() {
        let frame = PushFrame::event(None, serde_json::json!({"x": 1}));
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"data":{"x":1}}"#);

        let hello: Value = serde_json::from_str(&hello_message(SinkId::new())).unwrap();
        assert!(hello["client_id"].is_string());
    }
}
