//! Per-symbol order book synchronization
//!
//! ```text
//!  INIT ──ack──► BUFFERING ──snapshot──► RECONCILING ──bracketing delta──► LIVE
//!    │               │                        ▲                             │
//!    │          fetch failed                  │ snapshot + reset event      │ gap
//!    │               ▼                        │                             ▼
//!    │            HALTED                      └──────────────────────── RESYNCING
//!    └──────────── shutdown (any state) ──► CLOSED
//! ```
//!
//! A synchronizer is the only writer of its book. After every accepted
//! delta it stores a copy in the [`SnapshotStore`] and publishes a depth
//! event; after every resync it publishes a reset event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::errors::{FetchError, SyncError};
use types::ids::Symbol;

use crate::buffer::DeltaReceiver;
use crate::bus::EventBus;
use crate::events::{
    depth_topic, reset_topic, DepthEventFrame, DepthUpdate, EventAction, EventPayload,
    ResetEventFrame, Snapshot, DESYNC_REASON,
};
use crate::fetcher::SnapshotFetcher;
use crate::metrics::HubMetrics;
use crate::order_book::OrderBookState;
use crate::shutdown::ShutdownSignal;
use crate::snapshot::SnapshotStore;

/// Lifecycle state of one symbol's synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Waiting for the feed to acknowledge the subscription.
    Init,
    /// Buffering deltas while the initial snapshot is fetched.
    Buffering,
    /// Waiting for the first delta that brackets the snapshot.
    Reconciling,
    Live,
    /// Gap detected; refetching a snapshot.
    Resyncing,
    /// Initial snapshot could not be fetched; terminal.
    Halted,
    Closed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Init => "INIT",
            SyncState::Buffering => "BUFFERING",
            SyncState::Reconciling => "RECONCILING",
            SyncState::Live => "LIVE",
            SyncState::Resyncing => "RESYNCING",
            SyncState::Halted => "HALTED",
            SyncState::Closed => "CLOSED",
        }
    }
}

/// What the synchronizer did with one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Bracketing delta applied; the book is now live.
    Synchronized,
    /// Contiguous delta applied in LIVE.
    Applied,
    /// Skipped while reconciling.
    NotBracketing,
    /// Already covered by the book; dropped.
    Stale,
    /// Sequence gap; the synchronizer is now resyncing.
    Gap { expected: u64, got: u64 },
    /// `u < U`; dropped without a state change.
    Malformed,
    /// Not accepted in the current state.
    Ignored,
}

/// Configuration for the synchronizers.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Capacity of each symbol's delta buffer.
    pub buffer_capacity: usize,
    /// Extra attempts for the initial snapshot before halting.
    pub initial_snapshot_retries: u32,
    pub resync_backoff_base: Duration,
    pub resync_backoff_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            initial_snapshot_retries: 0,
            resync_backoff_base: Duration::from_millis(250),
            resync_backoff_max: Duration::from_secs(10),
        }
    }
}

/// Synchronization session for one symbol.
pub struct SymbolSynchronizer {
    symbol: Symbol,
    book: OrderBookState,
    state: SyncState,
    state_tx: watch::Sender<SyncState>,
    config: SyncConfig,
    store: Arc<SnapshotStore>,
    bus: EventBus,
    metrics: Arc<HubMetrics>,
}

impl SymbolSynchronizer {
    pub fn new(
        symbol: Symbol,
        config: SyncConfig,
        store: Arc<SnapshotStore>,
        bus: EventBus,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Init);
        Self {
            book: OrderBookState::new(symbol.clone()),
            symbol,
            state: SyncState::Init,
            state_tx,
            config,
            store,
            bus,
            metrics,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// The synchronizer's own book. Read-only outside this module.
    pub fn book(&self) -> &OrderBookState {
        &self.book
    }

    /// Observe state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, next: SyncState) {
        if self.state == next {
            return;
        }
        info!(
            symbol = %self.symbol,
            from = self.state.as_str(),
            to = next.as_str(),
            last_update_id = self.book.last_update_id(),
            "Synchronizer state change"
        );
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Feed acknowledged the subscription.
    pub fn mark_feed_ready(&mut self) {
        if self.state == SyncState::Init {
            self.set_state(SyncState::Buffering);
        }
    }

    /// Seed the book from a snapshot and start reconciling against it.
    pub fn install_snapshot(&mut self, snapshot: &Snapshot) {
        let stats = self.book.reset_from_snapshot(snapshot);
        if stats.skipped > 0 {
            self.metrics
                .levels_skipped
                .fetch_add(stats.skipped as u64, std::sync::atomic::Ordering::Relaxed);
        }
        self.store.set_item(self.book.clone());
        info!(
            symbol = %self.symbol,
            last_update_id = snapshot.last_update_id,
            bids = self.book.bid_depth(),
            asks = self.book.ask_depth(),
            "Snapshot installed"
        );
        self.set_state(SyncState::Reconciling);
    }

    /// Install a resync snapshot and tell subscribers the book was replaced.
    pub fn complete_resync(&mut self, snapshot: &Snapshot) {
        self.install_snapshot(snapshot);

        let frame = ResetEventFrame::new(self.book.view(), DESYNC_REASON);
        self.bus.publish(
            EventAction::OrderBookReset,
            &reset_topic(&self.symbol),
            EventPayload::Reset(frame),
        );
        self.metrics.record_resync();
        warn!(
            symbol = %self.symbol,
            last_update_id = snapshot.last_update_id,
            "Order book reset published"
        );
    }

    /// Run one delta through the state machine.
    pub fn handle_delta(&mut self, update: &DepthUpdate) -> DeltaOutcome {
        if update.final_update_id < update.first_update_id {
            self.metrics.record_malformed_frame();
            warn!(
                symbol = %self.symbol,
                first_update_id = update.first_update_id,
                final_update_id = update.final_update_id,
                "Delta with descending update ids dropped"
            );
            return DeltaOutcome::Malformed;
        }

        match self.state {
            SyncState::Reconciling => {
                if update.brackets(self.book.last_update_id()) {
                    self.apply(update);
                    self.book.set_initialized(true);
                    self.set_state(SyncState::Live);
                    DeltaOutcome::Synchronized
                } else {
                    self.metrics.record_not_bracketing();
                    debug!(
                        symbol = %self.symbol,
                        snapshot_id = self.book.last_update_id(),
                        first_update_id = update.first_update_id,
                        final_update_id = update.final_update_id,
                        "Delta does not bracket snapshot, skipped"
                    );
                    DeltaOutcome::NotBracketing
                }
            }
            SyncState::Live => {
                let last = self.book.last_update_id();
                let expected = last.saturating_add(1);
                if update.first_update_id == expected {
                    self.apply(update);
                    DeltaOutcome::Applied
                } else if update.first_update_id <= last {
                    self.metrics.record_stale();
                    debug!(
                        symbol = %self.symbol,
                        last_update_id = last,
                        first_update_id = update.first_update_id,
                        "Stale delta dropped"
                    );
                    DeltaOutcome::Stale
                } else {
                    let gap = SyncError::ConsistencyGap {
                        symbol: self.symbol.to_string(),
                        expected,
                        got: update.first_update_id,
                    };
                    self.metrics.record_gap();
                    warn!(symbol = %self.symbol, error = %gap, "Sequence gap, resyncing");
                    self.book.set_initialized(false);
                    self.set_state(SyncState::Resyncing);
                    DeltaOutcome::Gap {
                        expected,
                        got: update.first_update_id,
                    }
                }
            }
            _ => DeltaOutcome::Ignored,
        }
    }

    fn apply(&mut self, update: &DepthUpdate) {
        let started = Instant::now();
        let stats = self.book.apply_update(update);
        self.store.set_item(self.book.clone());
        self.bus.publish(
            EventAction::DepthUpdate,
            &depth_topic(&self.symbol),
            EventPayload::Depth(DepthEventFrame::from(update)),
        );
        self.metrics
            .record_applied(started.elapsed().as_nanos() as u64, stats.skipped);
    }

    /// Drive the synchronizer until shutdown or halt.
    ///
    /// `ready` is the feed's one-shot subscription acknowledgement.
    pub async fn run(
        mut self,
        ready: oneshot::Receiver<()>,
        mut deltas: DeltaReceiver,
        fetcher: Arc<dyn SnapshotFetcher>,
        mut shutdown: ShutdownSignal,
    ) {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                self.set_state(SyncState::Closed);
                return;
            }
            ack = ready => {
                if ack.is_err() {
                    warn!(symbol = %self.symbol, "Feed stopped before acknowledging subscription");
                    self.set_state(SyncState::Closed);
                    return;
                }
            }
        }
        self.mark_feed_ready();

        let Some(snapshot) = self.initial_snapshot(&fetcher, &mut shutdown).await else {
            return;
        };
        self.install_snapshot(&snapshot);

        loop {
            let update = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                update = deltas.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };

            if let DeltaOutcome::Gap { .. } = self.handle_delta(&update) {
                if !self.resync(&mut deltas, &fetcher, &mut shutdown).await {
                    break;
                }
            }
        }

        self.set_state(SyncState::Closed);
    }

    async fn initial_snapshot(
        &mut self,
        fetcher: &Arc<dyn SnapshotFetcher>,
        shutdown: &mut ShutdownSignal,
    ) -> Option<Snapshot> {
        let attempts = self.config.initial_snapshot_retries.saturating_add(1);
        let mut delay = self.config.resync_backoff_base;
        let mut last_error = FetchError::Aborted;

        for attempt in 1..=attempts {
            let handle = self.spawn_fetch(fetcher);
            let result = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!(symbol = %self.symbol, "Discarding in-flight snapshot fetch");
                    self.set_state(SyncState::Closed);
                    return None;
                }
                result = handle => join_fetch(result),
            };
            self.metrics.record_snapshot_fetch(result.is_ok());

            match result {
                Ok(snapshot) => return Some(snapshot),
                Err(err) => {
                    warn!(symbol = %self.symbol, attempt, attempts, error = %err, "Initial snapshot fetch failed");
                    last_error = err;
                }
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        self.set_state(SyncState::Closed);
                        return None;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(self.config.resync_backoff_max);
            }
        }

        let err = SyncError::InitialSnapshot {
            symbol: self.symbol.to_string(),
            attempts,
            reason: last_error.to_string(),
        };
        error!(symbol = %self.symbol, error = %err, "Halting synchronization");
        self.set_state(SyncState::Halted);
        None
    }

    /// Refetch until a snapshot is installed. Returns false on shutdown.
    async fn resync(
        &mut self,
        deltas: &mut DeltaReceiver,
        fetcher: &Arc<dyn SnapshotFetcher>,
        shutdown: &mut ShutdownSignal,
    ) -> bool {
        let mut delay = self.config.resync_backoff_base;

        loop {
            let mut handle = self.spawn_fetch(fetcher);
            let result = loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        debug!(symbol = %self.symbol, "Discarding in-flight snapshot fetch");
                        return false;
                    }
                    result = &mut handle => break join_fetch(result),
                    update = deltas.recv() => match update {
                        Some(update) => self.drop_during_resync(&update),
                        None => return false,
                    },
                }
            };
            self.metrics.record_snapshot_fetch(result.is_ok());

            match result {
                Ok(snapshot) => {
                    self.complete_resync(&snapshot);
                    return true;
                }
                Err(err) => {
                    warn!(
                        symbol = %self.symbol,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "Resync snapshot fetch failed"
                    );
                }
            }

            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => return false,
                    _ = &mut backoff => break,
                    update = deltas.recv() => match update {
                        Some(update) => self.drop_during_resync(&update),
                        None => return false,
                    },
                }
            }
            delay = (delay * 2).min(self.config.resync_backoff_max);
        }
    }

    fn drop_during_resync(&self, update: &DepthUpdate) {
        self.metrics.record_resync_drop();
        warn!(
            symbol = %self.symbol,
            first_update_id = update.first_update_id,
            final_update_id = update.final_update_id,
            "Dropping delta received during resync"
        );
    }

    /// Fetch on a detached task so shutdown never aborts the request;
    /// only its result is discarded.
    fn spawn_fetch(&self, fetcher: &Arc<dyn SnapshotFetcher>) -> JoinHandle<Result<Snapshot, FetchError>> {
        let fetcher = fetcher.clone();
        let symbol = self.symbol.clone();
        tokio::spawn(async move { fetcher.fetch(&symbol).await })
    }
}

fn join_fetch(
    result: Result<Result<Snapshot, FetchError>, tokio::task::JoinError>,
) -> Result<Snapshot, FetchError> {
    result.unwrap_or_else(|e| Err(FetchError::Transport(format!("fetch task failed: {e}"))))
}
