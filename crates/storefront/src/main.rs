//! Storefront live feed client entry point.
//!
//! Runs one feed session against a configured backend: polling starts
//! immediately, the push channel connects in the background, and the
//! process reports delivery metrics over Prometheus until ctrl-c.

use anyhow::Result;
use feed::{FeedSession, FeedSessionConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn session_config_from_env() -> FeedSessionConfig {
    let api_url = env_or("FEED_API_URL", "http://localhost:8080/api");
    let push_url = env_or("FEED_WS_URL", "ws://localhost:8080/live/socket");

    let mut config = FeedSessionConfig::new(api_url, push_url);

    if let Ok(ms) = env_or("FEED_POLL_INTERVAL_MS", "").parse::<u64>() {
        config.active_poll_interval = Duration::from_millis(ms);
    }
    match env_or("FEED_IDLE_POLL_INTERVAL_MS", "").parse::<u64>() {
        // 0 means: stop the poller entirely while push is healthy.
        Ok(0) => config.idle_poll_interval = None,
        Ok(ms) => config.idle_poll_interval = Some(Duration::from_millis(ms)),
        Err(_) => {}
    }

    config
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting storefront live feed client...");

    // Initialize Prometheus metrics exporter
    let metrics_port: u16 = env_or("METRICS_PORT", "9090").parse().unwrap_or(9090);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()?;

    info!(
        "Prometheus metrics available at http://0.0.0.0:{}/metrics",
        metrics_port
    );

    let config = session_config_from_env();
    info!(
        "Feed backend: {} (push: {})",
        config.api_url, config.push_url
    );

    let session = FeedSession::new(config)?;
    session.start();

    // Wait for Ctrl+C or termination signal
    tokio::signal::ctrl_c().await.ok();

    info!("Received shutdown signal, stopping feed session...");
    session.shutdown().await;

    info!("Storefront client shut down");
    Ok(())
}
