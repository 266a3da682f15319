mod error;
mod handlers;
mod rate_limit;
mod router;
mod settings;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use market_data_hub::feed::BinanceDepthFeed;
use market_data_hub::fetcher::RestSnapshotFetcher;
use market_data_hub::metrics::HubMetrics;
use market_data_hub::{MarketDataHub, SERVICE_VERSION};
use router::create_router;
use settings::{AppConfig, parse_symbols};
use state::AppState;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hub-gateway", version = SERVICE_VERSION, about = "Market data hub")]
struct Cli {
    /// Configuration file (YAML or TOML). Defaults to ./config.yaml if present.
    #[arg(long, global = true, env = "MDH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hub and serve HTTP/WebSocket clients
    Serve {
        #[arg(long, env = "MDH_PORT")]
        port: Option<u16>,

        /// Comma separated symbols, e.g. "BTCUSDT,BNBBTC"
        #[arg(long, env = "MDH_SYMBOLS")]
        symbols: Option<String>,
    },
    /// Query a running hub for one order book
    Snapshot {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,

        #[arg(long)]
        symbol: String,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("hub-gateway {SERVICE_VERSION}");
            Ok(())
        }
        Command::Snapshot { addr, symbol } => print_snapshot(&addr, &symbol).await,
        Command::Serve { port, symbols } => {
            let mut config =
                AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(symbols) = symbols {
                config.integrations.binance.subscriptions = symbols;
            }
            init_logging(&config.logging.level);
            serve(config).await
        }
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: AppConfig) -> Result<(), anyhow::Error> {
    let symbols = config.symbols();
    if symbols.is_empty() {
        anyhow::bail!("no valid symbols configured");
    }
    tracing::info!(
        symbols = ?symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "Starting market data hub"
    );

    let metrics = Arc::new(HubMetrics::new());
    let feed = Arc::new(BinanceDepthFeed::new(config.feed_config(), metrics.clone()));
    let fetcher = Arc::new(
        RestSnapshotFetcher::new(config.fetcher_config())
            .context("failed to build snapshot client")?,
    );
    let hub = Arc::new(MarketDataHub::start_with_metrics(
        config.hub_config(),
        feed,
        fetcher,
        metrics,
    ));

    let state = AppState::new(hub.clone(), config.server.rate_limit_per_minute);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if !hub.shutdown(config.shutdown_timeout()).await {
        tracing::warn!("Forced exit after shutdown timeout");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

async fn print_snapshot(addr: &str, symbol: &str) -> Result<(), anyhow::Error> {
    let Some(symbol) = parse_symbols(symbol).into_iter().next() else {
        anyhow::bail!("invalid symbol: {symbol}");
    };
    let url = format!("http://{addr}/v1/orderbook/{symbol}");

    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("request to {url} failed"))?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.context("invalid response body")?;

    if !status.is_success() {
        anyhow::bail!("{status}: {body}");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
