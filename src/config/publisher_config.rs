//! Publisher configuration parsing from environment variables.

use super::{parse_duration_ms, parse_duration_secs, parse_labels};
use crate::application::publisher::PublisherOptions;
use crate::infrastructure::observability::Labels;
use anyhow::{Context, Result, bail};
use std::env;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TOPIC: &str = "/devices/relay/events/metrics";

/// Publisher environment configuration
#[derive(Debug, Clone)]
pub struct PublisherEnvConfig {
    pub topic: String,
    /// Local text-format endpoints bundled into every publish
    pub scrape_urls: Vec<String>,
    pub publish_interval: Duration,
    pub ack_timeout: Duration,
    /// Static labels on the publisher's own self-metrics
    pub labels: Labels,
}

impl PublisherEnvConfig {
    pub fn from_env() -> Result<Self> {
        let scrape_urls = match env::var("RELAY_SCRAPE_URLS") {
            Ok(raw) => parse_scrape_urls(&raw).context("Failed to parse RELAY_SCRAPE_URLS")?,
            Err(_) => Vec::new(),
        };
        let labels = parse_labels(&env::var("RELAY_LABELS").unwrap_or_default())
            .context("Failed to parse RELAY_LABELS")?;

        let publish_interval = parse_duration_secs("RELAY_PUBLISH_INTERVAL_SECS", 60)?;
        if publish_interval.is_zero() {
            bail!("RELAY_PUBLISH_INTERVAL_SECS must be greater than 0");
        }

        Ok(Self {
            topic: env::var("RELAY_TOPIC").unwrap_or_else(|_| DEFAULT_TOPIC.to_string()),
            scrape_urls,
            publish_interval,
            ack_timeout: parse_duration_ms("RELAY_ACK_TIMEOUT_MS", 5000)?,
            labels,
        })
    }

    pub fn to_options(&self) -> PublisherOptions {
        let mut options = PublisherOptions::new(self.topic.clone());
        options.ack_timeout = self.ack_timeout;
        options.interval = self.publish_interval;
        options
    }
}

/// Comma-separated list of absolute http(s) URLs
pub fn parse_scrape_urls(raw: &str) -> Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let url = Url::parse(s).with_context(|| format!("Invalid scrape URL: {}", s))?;
            match url.scheme() {
                "http" | "https" => Ok(url.to_string()),
                other => bail!("Unsupported scheme {:?} in scrape URL {}", other, s),
            }
        })
        .collect()
}
