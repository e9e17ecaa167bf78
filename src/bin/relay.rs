//! promrelay - metric snapshot relay
//!
//! Runs both halves of the relay in one process over the in-memory broker: the
//! publisher bundles its own metrics plus any configured scrape targets, the
//! receiver caches the latest bundle per source and serves the merge on `/metrics`.
//!
//! # Usage
//! ```sh
//! RELAY_SCRAPE_URLS=http://127.0.0.1:9100/metrics cargo run --bin relay -- --interval 10
//! ```
//!
//! # Environment Variables
//! - `RELAY_*` - publisher and receiver settings (see `promrelay::config`)
//! - `OBSERVABILITY_ENABLED` - Serve `/metrics` and report status (default: true)
//! - `OBSERVABILITY_PORT` - Port of the `/metrics` endpoint (default: 9090)

use anyhow::{Context, Result};
use clap::Parser;
use promrelay::application::{Gatherers, Publisher, Receiver, StatusReporter};
use promrelay::config::{Config, parse_scrape_urls};
use promrelay::domain::ports::{Gatherer, Subscriber};
use promrelay::infrastructure::core::shutdown_channel;
use promrelay::infrastructure::observability::{RelayMetrics, serve_metrics};
use promrelay::infrastructure::{MemoryBroker, ScrapeGatherer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;

/// Device id stamped on the in-process publisher when no `instance` label is set
const LOCAL_DEVICE_ID: &str = "local";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Comma-separated scrape targets, overrides RELAY_SCRAPE_URLS
    #[arg(long)]
    scrape_urls: Option<String>,

    /// Seconds between publishes, overrides RELAY_PUBLISH_INTERVAL_SECS
    #[arg(short, long)]
    interval: Option<u64>,

    /// Port of the /metrics endpoint, overrides OBSERVABILITY_PORT
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(raw) = &cli.scrape_urls {
        config.publisher.scrape_urls = parse_scrape_urls(raw).context("Invalid --scrape-urls")?;
    }
    if let Some(secs) = cli.interval {
        anyhow::ensure!(secs > 0, "--interval must be greater than 0");
        config.publisher.publish_interval = Duration::from_secs(secs);
    }
    if let Some(port) = cli.port {
        config.observability.port = port;
    }

    info!("promrelay {} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: topic={}, scrape targets={:?}, interval={:?}",
        config.publisher.topic, config.publisher.scrape_urls, config.publisher.publish_interval
    );

    let publisher_metrics = RelayMetrics::new(config.publisher.labels.clone())
        .context("Failed to create publisher metrics")?;
    let receiver_metrics = RelayMetrics::new(config.receiver.labels.clone())
        .context("Failed to create receiver metrics")?;

    let broker = MemoryBroker::new();
    let (trigger, shutdown) = shutdown_channel();
    let mut tasks = Vec::new();

    // Receiver: subscribe before the first publish goes out
    let receiver = Receiver::new(receiver_metrics.clone(), config.receiver.to_options());
    let stream = broker
        .subscribe(&config.receiver.subscription)
        .await
        .context("Failed to subscribe")?;
    {
        let receiver = receiver.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = receiver.consume(stream, shutdown).await {
                error!("Receiver failed: {}", e);
            }
        }));
    }

    if config.observability.enabled {
        let addr = config.observability.socket_addr()?;
        let endpoint: Arc<dyn Gatherer> = Arc::new(
            Gatherers::new()
                .with(Arc::new(receiver_metrics))
                .with(Arc::new(receiver.clone())),
        );
        let server_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, endpoint, server_shutdown).await {
                error!("Metrics endpoint failed: {:#}", e);
            }
        }));

        let reporter = StatusReporter::new(
            receiver.clone(),
            Duration::from_secs(config.observability.interval),
        );
        tasks.push(tokio::spawn(reporter.run(shutdown.clone())));
    } else {
        info!("Metrics endpoint and status reporting disabled.");
    }

    // Publisher: own self-metrics first, then every scrape target
    let mut source = Gatherers::new().with(Arc::new(publisher_metrics.clone()));
    for url in &config.publisher.scrape_urls {
        source.push(Arc::new(ScrapeGatherer::new(url.clone())));
    }
    let device_id = config
        .publisher
        .labels
        .get("instance")
        .cloned()
        .unwrap_or_else(|| LOCAL_DEVICE_ID.to_string());
    let client = broker.client(publisher_attributes(
        &config.receiver.identity_attribute,
        config.receiver.cache_key_attribute.as_deref(),
        &device_id,
    ));
    let publisher = Publisher::new(
        Arc::new(source),
        Arc::new(client),
        publisher_metrics,
        config.publisher.to_options(),
    );
    tasks.push(tokio::spawn(publisher.run(shutdown)));

    info!("Relay running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping...");

    trigger.trigger();
    broker.close().await;
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Task ended abnormally: {}", e);
        }
    }

    info!("promrelay stopped.");
    Ok(())
}

/// Attributes the in-process publisher stamps on every message, so the receiver
/// finds the device under both its identity and its cache key attribute
fn publisher_attributes(
    identity_attribute: &str,
    cache_key_attribute: Option<&str>,
    device_id: &str,
) -> HashMap<String, String> {
    let mut attributes = HashMap::from([(identity_attribute.to_string(), device_id.to_string())]);
    if let Some(key) = cache_key_attribute {
        attributes.insert(key.to_string(), device_id.to_string());
    }
    attributes
}
