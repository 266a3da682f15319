//! Exchange depth stream client
//!
//! One WebSocket connection per symbol. Each session subscribes to
//! `<symbol>@depth` with a fresh correlation id, fires the synchronizer's
//! feed-ready signal on the matching acknowledgement, and forwards depth
//! frames into the symbol's delta buffer. Disconnects reconnect with
//! exponential backoff and resubscribe; the synchronizer sees the missed
//! updates as a sequence gap and resyncs.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use types::errors::FeedError;
use types::ids::Symbol;
use uuid::Uuid;

use crate::buffer::{DeltaSender, PushOutcome};
use crate::events::{parse_feed_frame, FeedFrame};
use crate::metrics::HubMetrics;
use crate::shutdown::ShutdownSignal;

/// Producer of depth updates for one symbol.
#[async_trait]
pub trait DepthFeed: Send + Sync + 'static {
    /// Stream until shutdown or until the buffer's receiving side is gone.
    ///
    /// `ready` fires once the exchange acknowledged the subscription.
    async fn run(
        &self,
        symbol: Symbol,
        deltas: DeltaSender,
        ready: oneshot::Sender<()>,
        shutdown: ShutdownSignal,
    );
}

/// Configuration for the exchange stream client.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Raw stream endpoint, e.g. `wss://stream.binance.com:9443/ws`.
    pub ws_stream_url: String,
    /// Keep-alive ping period.
    pub ping_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_stream_url: "wss://stream.binance.com:9443/ws".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    ReceiverGone,
}

/// Depth feed over the exchange's WebSocket stream.
pub struct BinanceDepthFeed {
    config: FeedConfig,
    metrics: Arc<HubMetrics>,
}

impl BinanceDepthFeed {
    pub fn new(config: FeedConfig, metrics: Arc<HubMetrics>) -> Self {
        Self { config, metrics }
    }

    async fn session(
        &self,
        symbol: &Symbol,
        deltas: &DeltaSender,
        ready: &mut Option<oneshot::Sender<()>>,
        shutdown: &mut ShutdownSignal,
    ) -> Result<SessionEnd, FeedError> {
        let url = self.config.ws_stream_url.as_str();
        let connected = tokio::select! {
            biased;
            _ = shutdown.recv() => return Ok(SessionEnd::Shutdown),
            connected = connect_async(url) => connected,
        };
        let (ws_stream, _) = connected.map_err(|e| FeedError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let (mut write, mut read) = ws_stream.split();

        let correlation_id = Uuid::now_v7().to_string();
        let request = json!({
            "method": "SUBSCRIBE",
            "params": [format!("{}@depth", symbol.stream_key())],
            "id": correlation_id,
        });
        write
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| FeedError::Send(e.to_string()))?;
        info!(%symbol, %url, id = %correlation_id, "Connected, subscription sent");

        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut keep_alive = tokio::time::interval_at(start, self.config.ping_interval);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = keep_alive.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| FeedError::Send(e.to_string()))?;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => return Err(FeedError::Read(e.to_string())),
                        None => return Err(FeedError::Closed),
                    };
                    match msg {
                        Message::Text(text) => {
                            if self.handle_text(symbol, &text, &correlation_id, deltas, ready)
                                == Some(SessionEnd::ReceiverGone)
                            {
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(SessionEnd::ReceiverGone);
                            }
                        }
                        Message::Ping(payload) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Message::Close(_) => return Err(FeedError::Closed),
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_text(
        &self,
        symbol: &Symbol,
        text: &str,
        correlation_id: &str,
        deltas: &DeltaSender,
        ready: &mut Option<oneshot::Sender<()>>,
    ) -> Option<SessionEnd> {
        self.metrics.record_frame();
        match parse_feed_frame(text) {
            Ok(FeedFrame::Depth(update)) => {
                if deltas.push(update) == PushOutcome::Closed {
                    debug!(%symbol, "Synchronizer gone, stopping feed");
                    return Some(SessionEnd::ReceiverGone);
                }
            }
            Ok(FeedFrame::Ack { id }) if id == Value::from(correlation_id) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                    info!(%symbol, "Depth subscription acknowledged");
                } else {
                    debug!(%symbol, "Resubscription acknowledged");
                }
            }
            Ok(FeedFrame::Ack { id }) => {
                debug!(%symbol, %id, "Ignoring acknowledgement for another request");
            }
            Ok(FeedFrame::Other) => {
                debug!(%symbol, "Ignoring non-depth frame");
            }
            Err(err) => {
                self.metrics.record_malformed_frame();
                warn!(%symbol, error = %err, "Skipping malformed frame");
            }
        }
        None
    }
}

#[async_trait]
impl DepthFeed for BinanceDepthFeed {
    async fn run(
        &self,
        symbol: Symbol,
        deltas: DeltaSender,
        ready: oneshot::Sender<()>,
        mut shutdown: ShutdownSignal,
    ) {
        let mut ready = Some(ready);
        let mut delay = self.config.reconnect_base;

        loop {
            if shutdown.is_shutdown() || deltas.is_closed() {
                break;
            }

            match self.session(&symbol, &deltas, &mut ready, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) | Ok(SessionEnd::ReceiverGone) => break,
                Err(err) => {
                    warn!(%symbol, error = %err, delay_ms = delay.as_millis() as u64, "Feed disconnected, reconnecting");
                }
            }

            self.metrics.record_reconnect();
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.config.reconnect_max);
        }

        info!(%symbol, "Feed stopped");
    }
}
