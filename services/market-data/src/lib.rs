//! Market Data Hub core
//!
//! Mirrors exchange order books and fans changes out to push clients:
//! - Per-symbol book synchronization (snapshot + sequenced deltas)
//! - Gap detection and automatic resync with reset events
//! - Topic-keyed event bus with ordered, bounded per-topic dispatch
//! - Sink registry with per-sink backpressure
//! - Snapshot store for synchronous book queries
//!
//! # Architecture
//!
//! ```text
//!  Exchange stream            Exchange REST
//!        │                         │
//!   ┌────▼────┐  delta buffer ┌────▼─────┐
//!   │  Feed   │──────────────►│   Sync   │  ← one per symbol, sole book writer
//!   └─────────┘               └──┬────┬──┘
//!                                │    │
//!                      ┌─────────▼┐  ┌▼──────────┐
//!                      │ Snapshot │  │ Event bus │  ← per-topic queue + worker
//!                      │  store   │  └─────┬─────┘
//!                      └─────▲────┘        │
//!                            │       ┌─────▼──────┐
//!                   queries ─┘       │  Registry  │──► sinks (bounded queues)
//!                                    └────────────┘
//! ```

pub mod backpressure;
pub mod buffer;
pub mod bus;
pub mod events;
pub mod feed;
pub mod fetcher;
pub mod hub;
pub mod metrics;
pub mod order_book;
pub mod protocol;
pub mod registry;
pub mod shutdown;
pub mod snapshot;
pub mod sync;

pub use hub::{HubConfig, MarketDataHub};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
