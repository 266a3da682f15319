//! Layered configuration
//!
//! Built-in defaults, then an optional file, then `MDH__SECTION__KEY`
//! environment variables. CLI flags are applied last by `main`.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use market_data_hub::bus::BusConfig;
use market_data_hub::feed::FeedConfig;
use market_data_hub::fetcher::FetcherConfig;
use market_data_hub::registry::RegistryConfig;
use market_data_hub::sync::SyncConfig;
use market_data_hub::HubConfig;
use serde::Deserialize;
use types::ids::Symbol;

pub const ENV_PREFIX: &str = "MDH";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub integrations: IntegrationSettings,
    pub sync: SyncSettings,
    pub bus: BusSettings,
    pub registry: RegistrySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationSettings {
    pub binance: BinanceSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSettings {
    pub ws_stream_url: String,
    pub rest_api_url_v3: String,
    /// Comma separated, e.g. `"BTCUSDT, BNBBTC"`.
    pub subscriptions: String,
    pub snapshot_limit: u32,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    pub buffer_capacity: usize,
    pub initial_snapshot_retries: u32,
    pub resync_backoff_base_ms: u64,
    pub resync_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    pub topic_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySettings {
    pub sink_queue_capacity: usize,
    pub max_subscriptions_per_sink: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl AppConfig {
    /// Load defaults, `path` (or `./config.yaml` if present) and environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.port", 8080)?
            .set_default("server.shutdown_timeout_secs", 10)?
            .set_default("server.rate_limit_per_minute", 100)?
            .set_default(
                "integrations.binance.ws_stream_url",
                "wss://stream.binance.com:9443/ws",
            )?
            .set_default(
                "integrations.binance.rest_api_url_v3",
                "https://api.binance.com/api/v3",
            )?
            .set_default("integrations.binance.subscriptions", "BTCUSDT, BNBBTC")?
            .set_default("integrations.binance.snapshot_limit", 1000)?
            .set_default("integrations.binance.request_timeout_ms", 1000)?
            .set_default("sync.buffer_capacity", 1000)?
            .set_default("sync.initial_snapshot_retries", 0)?
            .set_default("sync.resync_backoff_base_ms", 250)?
            .set_default("sync.resync_backoff_max_ms", 10_000)?
            .set_default("bus.topic_queue_capacity", 1024)?
            .set_default("registry.sink_queue_capacity", 256)?
            .set_default("registry.max_subscriptions_per_sink", 50)?
            .set_default("logging.level", "info")?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Configured symbols, normalized. Invalid entries are skipped.
    pub fn symbols(&self) -> Vec<Symbol> {
        parse_symbols(&self.integrations.binance.subscriptions)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            symbols: self.symbols(),
            sync: SyncConfig {
                buffer_capacity: self.sync.buffer_capacity,
                initial_snapshot_retries: self.sync.initial_snapshot_retries,
                resync_backoff_base: Duration::from_millis(self.sync.resync_backoff_base_ms),
                resync_backoff_max: Duration::from_millis(self.sync.resync_backoff_max_ms),
            },
            bus: BusConfig {
                topic_queue_capacity: self.bus.topic_queue_capacity,
            },
            registry: RegistryConfig {
                sink_queue_capacity: self.registry.sink_queue_capacity,
                max_subscriptions_per_sink: self.registry.max_subscriptions_per_sink,
            },
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            ws_stream_url: self.integrations.binance.ws_stream_url.clone(),
            ..FeedConfig::default()
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            rest_api_url: self
                .integrations
                .binance
                .rest_api_url_v3
                .trim_end_matches('/')
                .to_string(),
            limit: self.integrations.binance.snapshot_limit,
            request_timeout: Duration::from_millis(self.integrations.binance.request_timeout_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

/// Split a comma separated list: trimmed, upper-cased, empties skipped.
pub fn parse_symbols(list: &str) -> Vec<Symbol> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| {
            let symbol = Symbol::try_new(s);
            if symbol.is_none() {
                tracing::warn!(entry = s.trim(), "Ignoring invalid symbol in subscriptions");
            }
            symbol
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.rate_limit_per_minute, 100);
        assert_eq!(config.sync.buffer_capacity, 1000);
        assert_eq!(config.registry.max_subscriptions_per_sink, 50);
        assert_eq!(
            config.symbols(),
            vec![Symbol::new("BTCUSDT"), Symbol::new("BNBBTC")]
        );
    }

    #[test]
    fn test_parse_symbols() {
        let symbols = parse_symbols(" btcusdt, ,BNBBTC,, eth-usd ");
        assert_eq!(symbols, vec![Symbol::new("BTCUSDT"), Symbol::new("BNBBTC")]);
        assert!(parse_symbols("").is_empty());
    }

    #[test]
    fn test_hub_config_mapping() {
        let config = AppConfig::load(None).unwrap();
        let hub = config.hub_config();
        assert_eq!(hub.sync.resync_backoff_base, Duration::from_millis(250));
        assert_eq!(hub.sync.resync_backoff_max, Duration::from_secs(10));
        assert_eq!(hub.bus.topic_queue_capacity, 1024);

        let fetcher = config.fetcher_config();
        assert_eq!(fetcher.rest_api_url, "https://api.binance.com/api/v3");
        assert_eq!(fetcher.request_timeout, Duration::from_millis(1000));
    }
}
