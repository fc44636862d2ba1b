use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

use coinwatch::analysis::{CycleEngine, TradeActivityAnalyzer};
use coinwatch::api::BinanceClient;
use coinwatch::config::MonitorConfig;
use coinwatch::db::CoinStore;
use coinwatch::monitor::PriceMonitor;
use coinwatch::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cfg = MonitorConfig::from_env();
    tracing::info!("Starting coinwatch");
    tracing::info!("  Feed: {}", cfg.feed_base_url);
    tracing::info!("  Poll interval: {}s", cfg.poll_interval_secs);
    tracing::info!("  Cycle end threshold: {}%", cfg.cycle_end_percent);

    let store = Arc::new(CoinStore::connect(&cfg.database_url).await?);
    let feed = BinanceClient::new(cfg.feed_base_url.clone())?;
    let engine = CycleEngine::new(cfg.cycle_end_percent);

    let monitor = Arc::new(PriceMonitor::new(
        feed.clone(),
        store.clone(),
        engine,
        Duration::from_secs(cfg.poll_interval_secs),
        cfg.quote_suffix.clone(),
    ));

    // Seed the universe and realign prices; a down feed is not fatal, the
    // poll loop keeps retrying on its own schedule.
    if let Err(e) = monitor.bootstrap().await {
        tracing::warn!("Bootstrap against the price feed failed: {}", e);
    }

    {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            monitor.run().await;
        });
    }

    let analyzer = TradeActivityAnalyzer::new(feed.clone(), cfg.trade_window_secs);
    let state = Arc::new(AppState {
        store,
        feed,
        monitor,
        analyzer,
    });

    let addr = format!("{}:{}", cfg.bind, cfg.port);
    tracing::info!("coinwatch API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, server::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("coinwatch stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coinwatch=info")),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received, stopping");
}
