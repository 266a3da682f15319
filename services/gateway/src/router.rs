use crate::handlers::{orderbook, status, ws};
use crate::state::AppState;
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/orderbook/{symbol}", get(orderbook::get_orderbook))
        .route("/status", get(status::get_status))
        .route("/metrics", get(status::get_metrics));

    Router::new()
        .nest("/v1", api_routes)
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use market_data_hub::buffer::DeltaSender;
    use market_data_hub::events::Snapshot;
    use market_data_hub::feed::DepthFeed;
    use market_data_hub::fetcher::SnapshotFetcher;
    use market_data_hub::shutdown::ShutdownSignal;
    use market_data_hub::sync::SyncState;
    use market_data_hub::{HubConfig, MarketDataHub};
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tower::ServiceExt;
    use types::book::RawLevel;
    use types::errors::FetchError;
    use types::ids::Symbol;

    /// Acknowledges, then idles until shutdown.
    struct IdleFeed;

    #[async_trait]
    impl DepthFeed for IdleFeed {
        async fn run(
            &self,
            _symbol: Symbol,
            _deltas: DeltaSender,
            ready: oneshot::Sender<()>,
            mut shutdown: ShutdownSignal,
        ) {
            let _ = ready.send(());
            shutdown.recv().await;
        }
    }

    struct FixedFetcher;

    #[async_trait]
    impl SnapshotFetcher for FixedFetcher {
        async fn fetch(&self, symbol: &Symbol) -> Result<Snapshot, FetchError> {
            Ok(Snapshot {
                symbol: symbol.clone(),
                last_update_id: 77,
                bids: vec![RawLevel::new("100.5", "2")],
                asks: vec![RawLevel::new("101", "1")],
            })
        }
    }

    async fn test_state(rate_limit_per_minute: u32) -> AppState {
        let config = HubConfig {
            symbols: vec![Symbol::new("BTCUSDT")],
            ..HubConfig::default()
        };
        let hub = MarketDataHub::start(config, Arc::new(IdleFeed), Arc::new(FixedFetcher));
        let mut rx = hub.state_receiver(&Symbol::new("BTCUSDT")).unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| *s == SyncState::Reconciling),
        )
        .await
        .unwrap()
        .unwrap();
        AppState::new(Arc::new(hub), rate_limit_per_minute)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_orderbook_query() {
        let state = test_state(100).await;
        let app = create_router(state.clone());

        let response = app.clone().oneshot(get("/v1/orderbook/btcusdt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["symbol"], "BTCUSDT");
        assert_eq!(body["lastUpdateId"], 77);
        assert_eq!(body["bids"][0]["price"], "100.5");
        assert_eq!(body["asks"][0]["amount"], "1");

        let response = app.oneshot(get("/v1/orderbook/ZZZUSD")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "NOT_FOUND");

        state.hub.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_orderbook_rate_limited() {
        let state = test_state(2).await;
        let app = create_router(state.clone());

        for _ in 0..2 {
            let response = app.clone().oneshot(get("/v1/orderbook/BTCUSDT")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.oneshot(get("/v1/orderbook/BTCUSDT")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        state.hub.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_status_and_metrics() {
        let state = test_state(100).await;
        let app = create_router(state.clone());

        let response = app.clone().oneshot(get("/v1/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["symbols"]["BTCUSDT"], "RECONCILING");
        assert_eq!(body["sinks"], 0);

        let response = app.oneshot(get("/v1/metrics")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["snapshot_fetches"], 1);

        state.hub.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_ws_hello_subscribe_and_close_on_shutdown() {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let state = test_state(100).await;
        let app = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/v1/ws"))
            .await
            .unwrap();

        let next_json = |msg: Option<Result<Message, _>>| -> Value {
            match msg {
                Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            }
        };

        let hello = next_json(ws.next().await);
        assert!(hello["client_id"].as_str().is_some());

        ws.send(Message::Text("not json".to_string())).await.unwrap();
        ws.send(Message::Text(
            r#"{"method":"SUBSCRIBE","params":{"topic":"btcusdt@depth"}}"#.to_string(),
        ))
        .await
        .unwrap();
        let reply = next_json(ws.next().await);
        assert_eq!(reply["method"], "subscribe");
        assert_eq!(reply["success"], true);
        assert_eq!(reply["data"]["lastUpdateId"], 77);

        ws.send(Message::Text(r#"{"method":"ping"}"#.to_string()))
            .await
            .unwrap();
        let reply = next_json(ws.next().await);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "unknown action");

        state.hub.shutdown(Duration::from_secs(2)).await;
        let closing = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap();
        assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
    }
}
