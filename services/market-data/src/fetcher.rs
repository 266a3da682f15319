//! Out-of-band snapshot fetching
//!
//! `GET {base}/depth?symbol=<SYMBOL>&limit=<n>` →
//! `{lastUpdateId, bids:[[p,q]..], asks:[[p,q]..]}`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use types::errors::FetchError;
use types::ids::Symbol;

use crate::events::{Snapshot, SnapshotBody};

/// Source of full order book snapshots.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync + 'static {
    async fn fetch(&self, symbol: &Symbol) -> Result<Snapshot, FetchError>;
}

/// Configuration for the REST fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Base URL of the v3 REST API, without trailing slash.
    pub rest_api_url: String,
    /// Depth levels requested per side.
    pub limit: u32,
    pub request_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            rest_api_url: "https://api.binance.com/api/v3".to_string(),
            limit: 1000,
            request_timeout: Duration::from_millis(1000),
        }
    }
}

/// Snapshot fetcher backed by the exchange REST API.
pub struct RestSnapshotFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl RestSnapshotFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn depth_url(&self, symbol: &Symbol) -> String {
        format!(
            "{}/depth?symbol={}&limit={}",
            self.config.rest_api_url.trim_end_matches('/'),
            symbol.as_str(),
            self.config.limit
        )
    }
}

#[async_trait]
impl SnapshotFetcher for RestSnapshotFetcher {
    async fn fetch(&self, symbol: &Symbol) -> Result<Snapshot, FetchError> {
        let url = self.depth_url(symbol);
        debug!(%symbol, %url, "Fetching depth snapshot");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let body: SnapshotBody =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))?;

        debug!(
            %symbol,
            last_update_id = body.last_update_id,
            bids = body.bids.len(),
            asks = body.asks.len(),
            "Depth snapshot received"
        );
        Ok(Snapshot::from_body(symbol.clone(), body))
    }
}
