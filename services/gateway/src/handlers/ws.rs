//! Push client connections
//!
//! Each connection gets a registry sink. A writer task drains the sink's
//! queue onto the socket; the reader routes requests through the push
//! protocol and queues the replies on the same sink, so replies and
//! broadcasts share one ordered outbound path.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use market_data_hub::protocol::hello_message;
use market_data_hub::registry::Sink;
use tracing::{debug, info, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response, AppError> {
    state.rate_limiter.check(peer.ip())?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, peer)))
}

async fn handle_socket(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let hub = state.hub;
    let sink = hub.registry().new_sink(peer);
    let sink_id = sink.id();
    info!(%sink_id, %peer, "Push client connected");

    let _ = sink.send(Arc::from(hello_message(sink_id)));

    let (sender, mut receiver) = socket.split();
    let mut write_task = tokio::spawn(write_loop(sink.clone(), sender));

    let protocol = hub.protocol().clone();
    let reply_sink = sink.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(%sink_id, error = %e, "Socket read failed");
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    let Some(reply) = protocol.handle_text(sink_id, text.as_str()) else {
                        continue;
                    };
                    match serde_json::to_string(&reply) {
                        Ok(json) => {
                            let _ = reply_sink.send(Arc::from(json));
                        }
                        Err(e) => warn!(%sink_id, error = %e, "Failed to encode reply"),
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.registry().unregister(sink_id);
    info!(%sink_id, %peer, "Push client disconnected");
}

/// Forward queued messages until the sink closes, then send a Close frame.
async fn write_loop(sink: Arc<Sink>, mut sender: futures::stream::SplitSink<WebSocket, Message>) {
    while let Some(text) = sink.next_message().await {
        if sender.send(Message::Text(text.to_string().into())).await.is_err() {
            return;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}
