//! Per-symbol delta buffer
//!
//! The one structure shared between a feed's read task and the symbol's
//! synchronizer. Bounded FIFO; when full the arriving delta is dropped
//! (newest-drop) with a warning so the feed never blocks on a slow or
//! resyncing synchronizer.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use types::ids::Symbol;

use crate::events::DepthUpdate;
use crate::metrics::HubMetrics;

/// Outcome of pushing one delta into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Buffered,
    /// Buffer full; this delta was discarded.
    Dropped,
    /// The synchronizer is gone (halted or shut down).
    Closed,
}

/// Create the bounded buffer for one symbol.
pub fn delta_buffer(
    symbol: Symbol,
    capacity: usize,
    metrics: Arc<HubMetrics>,
) -> (DeltaSender, DeltaReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (
        DeltaSender {
            symbol,
            tx,
            capacity,
            metrics,
        },
        DeltaReceiver { rx },
    )
}

/// Feed side of the buffer.
#[derive(Debug, Clone)]
pub struct DeltaSender {
    symbol: Symbol,
    tx: mpsc::Sender<DepthUpdate>,
    capacity: usize,
    metrics: Arc<HubMetrics>,
}

impl DeltaSender {
    /// Append a delta without waiting.
    pub fn push(&self, update: DepthUpdate) -> PushOutcome {
        match self.tx.try_send(update) {
            Ok(()) => {
                self.metrics.record_buffered();
                PushOutcome::Buffered
            }
            Err(TrySendError::Full(dropped)) => {
                self.metrics.record_overflow_drop();
                warn!(
                    symbol = %self.symbol,
                    capacity = self.capacity,
                    first_update_id = dropped.first_update_id,
                    final_update_id = dropped.final_update_id,
                    "Delta buffer full, dropping newest delta"
                );
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// True once the synchronizer side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Synchronizer side of the buffer.
#[derive(Debug)]
pub struct DeltaReceiver {
    rx: mpsc::Receiver<DepthUpdate>,
}

impl DeltaReceiver {
    /// Next delta in arrival order; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<DepthUpdate> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DepthUpdate> {
        self.rx.try_recv().ok()
    }

    /// Deltas currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
