//! Composition root for the hub core
//!
//! Builds the store, bus and registry once, wires one feed and one
//! synchronizer per configured symbol, and owns the shutdown trigger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::errors::QueryError;
use types::ids::Symbol;

use crate::buffer::delta_buffer;
use crate::bus::{BusConfig, EventBus};
use crate::events::{depth_topic, reset_topic};
use crate::feed::DepthFeed;
use crate::fetcher::SnapshotFetcher;
use crate::metrics::HubMetrics;
use crate::protocol::PushProtocol;
use crate::registry::{RegistryConfig, RegistryForwarder, SubscriptionRegistry};
use crate::shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
use crate::snapshot::{SnapshotReply, SnapshotStore};
use crate::sync::{SymbolSynchronizer, SyncConfig, SyncState};

/// Configuration for the whole core.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub symbols: Vec<Symbol>,
    pub sync: SyncConfig,
    pub bus: BusConfig,
    pub registry: RegistryConfig,
}

/// Running hub: shared components plus the per-symbol tasks.
pub struct MarketDataHub {
    store: Arc<SnapshotStore>,
    registry: Arc<SubscriptionRegistry>,
    bus: EventBus,
    protocol: Arc<PushProtocol>,
    metrics: Arc<HubMetrics>,
    states: BTreeMap<Symbol, watch::Receiver<SyncState>>,
    trigger: ShutdownTrigger,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MarketDataHub {
    /// Wire and spawn everything. Must be called inside a Tokio runtime.
    pub fn start(
        config: HubConfig,
        feed: Arc<dyn DepthFeed>,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> Self {
        Self::start_with_metrics(config, feed, fetcher, Arc::new(HubMetrics::new()))
    }

    /// Same as [`MarketDataHub::start`], recording into counters the feed
    /// may already share.
    pub fn start_with_metrics(
        config: HubConfig,
        feed: Arc<dyn DepthFeed>,
        fetcher: Arc<dyn SnapshotFetcher>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let (trigger, signal) = shutdown_channel();
        let store = Arc::new(SnapshotStore::new());
        let registry = Arc::new(SubscriptionRegistry::new(config.registry.clone(), metrics.clone()));
        let bus = EventBus::new(config.bus.clone(), signal.clone(), metrics.clone());
        let protocol = Arc::new(PushProtocol::new(registry.clone(), store.clone()));
        let forwarder = Arc::new(RegistryForwarder::new(registry.clone()));

        let mut states = BTreeMap::new();
        let mut tasks = Vec::new();

        for symbol in &config.symbols {
            if states.contains_key(symbol) {
                warn!(%symbol, "Duplicate symbol in configuration, ignored");
                continue;
            }

            bus.subscribe(&depth_topic(symbol), forwarder.clone());
            bus.subscribe(&reset_topic(symbol), forwarder.clone());

            let (delta_tx, delta_rx) =
                delta_buffer(symbol.clone(), config.sync.buffer_capacity, metrics.clone());
            let (ready_tx, ready_rx) = oneshot::channel();

            let synchronizer = SymbolSynchronizer::new(
                symbol.clone(),
                config.sync.clone(),
                store.clone(),
                bus.clone(),
                metrics.clone(),
            );
            states.insert(symbol.clone(), synchronizer.state_receiver());

            tasks.push(tokio::spawn(synchronizer.run(
                ready_rx,
                delta_rx,
                fetcher.clone(),
                signal.clone(),
            )));

            let feed = feed.clone();
            let feed_symbol = symbol.clone();
            let feed_signal = signal.clone();
            tasks.push(tokio::spawn(async move {
                feed.run(feed_symbol, delta_tx, ready_tx, feed_signal).await;
            }));
        }

        info!(symbols = states.len(), "Market data hub started");

        Self {
            store,
            registry,
            bus,
            protocol,
            metrics,
            states,
            trigger,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn protocol(&self) -> &Arc<PushProtocol> {
        &self.protocol
    }

    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.states.keys().cloned().collect()
    }

    /// Current state of every synchronizer.
    pub fn sync_states(&self) -> BTreeMap<Symbol, SyncState> {
        self.states
            .iter()
            .map(|(symbol, rx)| (symbol.clone(), *rx.borrow()))
            .collect()
    }

    /// Watch one synchronizer's state.
    pub fn state_receiver(&self, symbol: &Symbol) -> Option<watch::Receiver<SyncState>> {
        self.states.get(symbol).cloned()
    }

    /// Synchronous snapshot query.
    pub fn snapshot(&self, symbol: &Symbol) -> Result<SnapshotReply, QueryError> {
        self.store.query(symbol)
    }

    /// Signal observed by every hub task.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.trigger.signal()
    }

    /// Stop every task, close all sinks and wait up to `timeout`.
    ///
    /// Returns false if some task did not finish in time. Calling it again
    /// only re-closes the sinks.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!("Shutting down market data hub");
        self.trigger.trigger();
        self.registry.close_all();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let bus = self.bus.clone();
        let drained = tokio::time::timeout(timeout, async move {
            for task in tasks {
                let _ = task.await;
            }
            bus.join().await;
        })
        .await
        .is_ok();

        if drained {
            info!("Market data hub stopped");
        } else {
            warn!(timeout_ms = timeout.as_millis() as u64, "Hub tasks did not stop in time");
        }
        drained
    }
}
