//! Sink and subscription registry
//!
//! Tracks connected push clients (sinks), their topic memberships and their
//! outbound queues. A broadcast serializes once and enqueues the same bytes
//! onto every subscriber's bounded queue; a full queue drops the newest
//! message for that sink only.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use types::errors::RegistrationError;
use types::ids::SinkId;

use crate::backpressure::{BoundedQueue, DropPolicy, PushResult};
use crate::bus::EventHandler;
use crate::events::{DomainEvent, EventAction, EventPayload};
use crate::metrics::HubMetrics;
use crate::protocol::PushFrame;

/// Configuration for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Outbound messages buffered per sink before newest-drop kicks in.
    pub sink_queue_capacity: usize,
    /// Max topics per sink.
    pub max_subscriptions_per_sink: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sink_queue_capacity: 256,
            max_subscriptions_per_sink: 50,
        }
    }
}

/// One connected push client.
///
/// Holds no book state, only topic keys and serialized outbound messages.
#[derive(Debug)]
pub struct Sink {
    id: SinkId,
    peer: SocketAddr,
    queue: BoundedQueue<Arc<str>>,
    topics: Mutex<BTreeSet<String>>,
}

impl Sink {
    pub fn new(peer: SocketAddr, queue_capacity: usize) -> Self {
        Self {
            id: SinkId::new(),
            peer,
            queue: BoundedQueue::new(queue_capacity, DropPolicy::DropNewest),
            topics: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a message for this sink only.
    pub fn send(&self, message: Arc<str>) -> PushResult {
        self.queue.push(message)
    }

    /// Next outbound message; `None` once the sink is closed.
    pub async fn next_message(&self) -> Option<Arc<str>> {
        self.queue.pop().await
    }

    /// Close the outbound queue. The write loop exits on its next wait.
    pub fn close(&self) {
        self.queue.close();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    /// Subscribed topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct RegistryInner {
    sinks: BTreeMap<SinkId, Arc<Sink>>,
    by_peer: HashMap<SocketAddr, SinkId>,
    topics: HashMap<String, BTreeMap<SinkId, Arc<Sink>>>,
}

/// All connected sinks and their topic memberships.
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
    config: RegistryConfig,
    metrics: Arc<HubMetrics>,
}

impl SubscriptionRegistry {
    pub fn new(config: RegistryConfig, metrics: Arc<HubMetrics>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a sink for a new connection and register it.
    pub fn new_sink(&self, peer: SocketAddr) -> Arc<Sink> {
        let sink = Arc::new(Sink::new(peer, self.config.sink_queue_capacity));
        self.register(sink.clone());
        sink
    }

    pub fn register(&self, sink: Arc<Sink>) {
        let count = {
            let mut inner = self.inner.write();
            inner.by_peer.insert(sink.peer(), sink.id());
            inner.sinks.insert(sink.id(), sink.clone());
            inner.sinks.len()
        };
        self.metrics.set_connected_sinks(count as u64);
        info!(sink_id = %sink.id(), peer = %sink.peer(), sinks = count, "Sink registered");
    }

    /// Remove a sink from every topic and close its connection.
    pub fn unregister(&self, id: SinkId) -> Option<Arc<Sink>> {
        let (sink, count) = {
            let mut inner = self.inner.write();
            let sink = inner.sinks.remove(&id)?;
            if inner.by_peer.get(&sink.peer()) == Some(&id) {
                inner.by_peer.remove(&sink.peer());
            }
            for topic in sink.topics.lock().iter() {
                if let Some(members) = inner.topics.get_mut(topic) {
                    members.remove(&id);
                    if members.is_empty() {
                        inner.topics.remove(topic);
                    }
                }
            }
            sink.topics.lock().clear();
            (sink, inner.sinks.len())
        };

        sink.close();
        self.metrics.set_connected_sinks(count as u64);
        info!(sink_id = %id, peer = %sink.peer(), dropped = sink.dropped(), "Sink unregistered");
        Some(sink)
    }

    /// Add a topic membership. Returns false if it already existed.
    pub fn subscribe(&self, id: SinkId, topic: &str) -> Result<bool, RegistrationError> {
        let mut inner = self.inner.write();
        let sink = inner
            .sinks
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistrationError::SinkNotFound(id.to_string()))?;

        {
            let mut topics = sink.topics.lock();
            if topics.contains(topic) {
                return Ok(false);
            }
            if topics.len() >= self.config.max_subscriptions_per_sink {
                return Err(RegistrationError::SubscriptionLimit(
                    self.config.max_subscriptions_per_sink,
                ));
            }
            topics.insert(topic.to_string());
        }

        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id, sink);
        debug!(sink_id = %id, topic, "Sink subscribed");
        Ok(true)
    }

    /// Remove a topic membership. Returns false if it did not exist.
    pub fn unsubscribe(&self, id: SinkId, topic: &str) -> Result<bool, RegistrationError> {
        let mut inner = self.inner.write();
        let sink = inner
            .sinks
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistrationError::SinkNotFound(id.to_string()))?;

        if !sink.topics.lock().remove(topic) {
            return Ok(false);
        }
        if let Some(members) = inner.topics.get_mut(topic) {
            members.remove(&id);
            if members.is_empty() {
                inner.topics.remove(topic);
            }
        }
        debug!(sink_id = %id, topic, "Sink unsubscribed");
        Ok(true)
    }

    /// Serialize once and enqueue on every subscriber of the topic.
    pub fn broadcast<T: Serialize>(&self, topic: &str, message: &T) -> BroadcastReport {
        match serde_json::to_string(message) {
            Ok(text) => self.broadcast_raw(topic, Arc::from(text)),
            Err(err) => {
                warn!(topic, error = %err, "Failed to serialize broadcast message");
                BroadcastReport::default()
            }
        }
    }

    /// Enqueue pre-serialized bytes on every subscriber of the topic.
    pub fn broadcast_raw(&self, topic: &str, message: Arc<str>) -> BroadcastReport {
        let started = Instant::now();
        let members: Vec<Arc<Sink>> = match self.inner.read().topics.get(topic) {
            Some(members) => members.values().cloned().collect(),
            None => {
                debug!(topic, "Broadcast target has no subscribers");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for sink in members {
            match sink.send(message.clone()) {
                PushResult::Queued => report.delivered += 1,
                PushResult::DroppedNewest | PushResult::DroppedOldest => {
                    report.dropped += 1;
                    self.metrics.record_backpressure_drop();
                    warn!(
                        sink_id = %sink.id(),
                        topic,
                        queue_len = sink.queue_len(),
                        "Sink queue full, dropping message"
                    );
                }
                PushResult::Closed => {}
            }
        }

        self.metrics
            .record_broadcast(started.elapsed().as_nanos() as u64);
        report
    }

    /// Sink currently registered for a peer address.
    pub fn lookup(&self, peer: &SocketAddr) -> Option<Arc<Sink>> {
        let inner = self.inner.read();
        let id = inner.by_peer.get(peer)?;
        inner.sinks.get(id).cloned()
    }

    pub fn lookup_by_id(&self, id: SinkId) -> Option<Arc<Sink>> {
        self.inner.read().sinks.get(&id).cloned()
    }

    /// Sinks subscribed to a topic, in id order.
    pub fn subscribers(&self, topic: &str) -> Vec<SinkId> {
        self.inner
            .read()
            .topics
            .get(topic)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn sink_count(&self) -> usize {
        self.inner.read().sinks.len()
    }

    pub fn topic_count(&self) -> usize {
        self.inner.read().topics.len()
    }

    /// Unregister every sink.
    pub fn close_all(&self) {
        let ids: Vec<SinkId> = self.inner.read().sinks.keys().copied().collect();
        for id in ids {
            self.unregister(id);
        }
    }
}

/// Bus handler that turns domain events into push frames for sinks.
pub struct RegistryForwarder {
    registry: Arc<SubscriptionRegistry>,
}

impl RegistryForwarder {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }
}

impl EventHandler for RegistryForwarder {
    fn invoke(&self, event: &DomainEvent) {
        let report = match (&event.action, &event.payload) {
            (EventAction::OrderBookReset, EventPayload::Reset(frame)) => self
                .registry
                .broadcast(&event.topic, &PushFrame::event(Some("orderbook_reset"), frame)),
            (_, payload) => self
                .registry
                .broadcast(&event.topic, &PushFrame::event(None, payload)),
        };
        debug!(
            topic = %event.topic,
            action = event.action.as_str(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Forwarded event to sinks"
        );
    }
}
