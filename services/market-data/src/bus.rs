//! Topic-keyed event bus
//!
//! ```text
//!  publish(action, topic, payload)          (never blocks)
//!        │
//!        ▼
//!  ┌──────────────┐   one per topic, bounded, drop-oldest
//!  │ topic queue  │
//!  └──────┬───────┘
//!         ▼
//!  dispatch worker ──► handler₁.invoke(ev), handler₂.invoke(ev), ...
//! ```
//!
//! Handler lists are copy-on-write: a worker takes an `Arc` snapshot of the
//! list for each event and holds no lock while invoking handlers, so
//! subscribe/unsubscribe never races with an in-flight delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backpressure::{BoundedQueue, DropPolicy, PushResult};
use crate::events::{DomainEvent, EventAction, EventPayload};
use crate::metrics::HubMetrics;
use crate::shutdown::ShutdownSignal;

/// Capability invoked by the bus for every event on a subscribed topic.
///
/// Runs on the topic's dispatch worker; implementations must not block.
pub trait EventHandler: Send + Sync + 'static {
    fn invoke(&self, event: &DomainEvent);
}

/// Identifies one subscription for later removal.
pub type HandlerId = u64;

type HandlerList = Arc<Vec<(HandlerId, Arc<dyn EventHandler>)>>;

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum queued events per topic before the oldest is dropped.
    pub topic_queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic_queue_capacity: 1024,
        }
    }
}

struct TopicDispatcher {
    topic: String,
    handlers: RwLock<HandlerList>,
    queue: BoundedQueue<Arc<DomainEvent>>,
}

struct BusInner {
    topics: RwLock<HashMap<String, Arc<TopicDispatcher>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    config: BusConfig,
    shutdown: ShutdownSignal,
    metrics: Arc<HubMetrics>,
}

/// Cheaply cloneable handle to the bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: BusConfig, shutdown: ShutdownSignal, metrics: Arc<HubMetrics>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                config,
                shutdown,
                metrics,
            }),
        }
    }

    /// Register a handler for a topic.
    ///
    /// The first subscription to a topic spawns its dispatch worker.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> HandlerId {
        let dispatcher = self.dispatcher(topic);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut handlers = dispatcher.handlers.write();
        let mut next = Vec::with_capacity(handlers.len() + 1);
        next.extend(handlers.iter().cloned());
        next.push((id, handler));
        *handlers = Arc::new(next);

        debug!(topic, handler_id = id, subscribers = handlers.len(), "Handler subscribed");
        id
    }

    /// Remove a handler. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, topic: &str, id: HandlerId) -> bool {
        let Some(dispatcher) = self.inner.topics.read().get(topic).cloned() else {
            return false;
        };

        let mut handlers = dispatcher.handlers.write();
        if !handlers.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = handlers
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *handlers = Arc::new(next);

        debug!(topic, handler_id = id, "Handler unsubscribed");
        true
    }

    /// Subscribe with a channel the caller owns instead of a handler.
    pub fn subscribe_channel(
        &self,
        topic: &str,
        capacity: usize,
    ) -> (HandlerId, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(topic, Arc::new(ChannelHandler::new(tx)));
        (id, rx)
    }

    /// Enqueue an event for the topic's worker and return immediately.
    ///
    /// Topics nobody ever subscribed to have no queue; the event is discarded.
    pub fn publish(&self, action: EventAction, topic: &str, payload: EventPayload) {
        let Some(dispatcher) = self.inner.topics.read().get(topic).cloned() else {
            debug!(topic, action = action.as_str(), "No subscribers, event discarded");
            return;
        };

        let event = Arc::new(DomainEvent {
            action,
            topic: topic.to_string(),
            payload,
        });

        self.inner.metrics.record_published();
        match dispatcher.queue.push(event) {
            PushResult::DroppedOldest => {
                self.inner.metrics.record_event_dropped();
                warn!(
                    topic,
                    capacity = dispatcher.queue.capacity(),
                    dropped_total = dispatcher.queue.dropped(),
                    "Topic queue full, dropped oldest event"
                );
            }
            PushResult::Closed => {
                debug!(topic, "Bus stopped, event discarded");
            }
            PushResult::Queued | PushResult::DroppedNewest => {}
        }
    }

    /// Events waiting in a topic's queue.
    pub fn queue_depth(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|d| d.queue.len())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|d| d.handlers.read().len())
            .unwrap_or(0)
    }

    /// Topics with a dispatch worker, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.topics.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Close every topic queue and wait for the workers to exit.
    pub async fn join(&self) {
        for dispatcher in self.inner.topics.read().values() {
            dispatcher.queue.close();
        }
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }

    fn dispatcher(&self, topic: &str) -> Arc<TopicDispatcher> {
        if let Some(existing) = self.inner.topics.read().get(topic) {
            return existing.clone();
        }

        let mut topics = self.inner.topics.write();
        if let Some(existing) = topics.get(topic) {
            return existing.clone();
        }

        let dispatcher = Arc::new(TopicDispatcher {
            topic: topic.to_string(),
            handlers: RwLock::new(Arc::new(Vec::new())),
            queue: BoundedQueue::new(self.inner.config.topic_queue_capacity, DropPolicy::DropOldest),
        });
        topics.insert(topic.to_string(), dispatcher.clone());

        let worker = tokio::spawn(dispatch_loop(dispatcher.clone(), self.inner.shutdown.clone()));
        self.inner.workers.lock().push(worker);
        debug!(topic, "Spawned dispatch worker");

        dispatcher
    }
}

async fn dispatch_loop(dispatcher: Arc<TopicDispatcher>, mut shutdown: ShutdownSignal) {
    loop {
        let event = tokio::select! {
            _ = shutdown.recv() => break,
            event = dispatcher.queue.pop() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let handlers = dispatcher.handlers.read().clone();
        for (_, handler) in handlers.iter() {
            handler.invoke(&event);
        }
    }
    dispatcher.queue.close();
    debug!(topic = %dispatcher.topic, "Dispatch worker stopped");
}

/// Handler that forwards events onto a channel owned by the subscriber.
///
/// A full or closed channel drops the event for this subscriber only.
pub struct ChannelHandler {
    tx: mpsc::Sender<DomainEvent>,
}

impl ChannelHandler {
    pub fn new(tx: mpsc::Sender<DomainEvent>) -> Self {
        Self { tx }
    }
}

impl EventHandler for ChannelHandler {
    fn invoke(&self, event: &DomainEvent) {
        if let Err(err) = self.tx.try_send(event.clone()) {
            warn!(topic = %event.topic, error = %err, "Channel subscriber lagging, event dropped");
        }
    }
}
