//! Configuration module for the relay.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Publisher, Receiver and Observability.

mod observability_config;
mod publisher_config;
mod receiver_config;

pub use observability_config::ObservabilityEnvConfig;
pub use publisher_config::{DEFAULT_TOPIC, PublisherEnvConfig, parse_scrape_urls};
pub use receiver_config::{DEFAULT_SUBSCRIPTION, ReceiverEnvConfig};

use crate::domain::family::is_valid_label_name;
use crate::infrastructure::observability::Labels;
use anyhow::{Context, Result, bail};
use std::env;
use std::time::Duration;

/// Main relay configuration.
///
/// This struct aggregates all configuration from sub-modules.
#[derive(Debug, Clone)]
pub struct Config {
    pub publisher: PublisherEnvConfig,
    pub receiver: ReceiverEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let publisher = PublisherEnvConfig::from_env().context("Failed to load publisher config")?;
        let receiver = ReceiverEnvConfig::from_env().context("Failed to load receiver config")?;
        let observability = ObservabilityEnvConfig::from_env();

        Ok(Self {
            publisher,
            receiver,
            observability,
        })
    }
}

/// Parse `key=value,key=value` into a label map. Blank input yields no labels.
pub fn parse_labels(raw: &str) -> Result<Labels> {
    let mut labels = Labels::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("Label {:?} is not of the form name=value", pair);
        };
        let name = name.trim();
        if !is_valid_label_name(name) {
            bail!("Invalid label name {:?}", name);
        }
        if labels.insert(name.to_string(), value.trim().to_string()).is_some() {
            bail!("Label {:?} given more than once", name);
        }
    }
    Ok(labels)
}

fn parse_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<usize>()
        .context(format!("Failed to parse {}", key))
}

fn parse_duration_secs(key: &str, default: u64) -> Result<Duration> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .map(Duration::from_secs)
        .context(format!("Failed to parse {}", key))
}

fn parse_duration_ms(key: &str, default: u64) -> Result<Duration> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .map(Duration::from_millis)
        .context(format!("Failed to parse {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels("instance=dev-1, location = lab ,").unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["instance"], "dev-1");
        assert_eq!(labels["location"], "lab");

        assert!(parse_labels("").unwrap().is_empty());
        assert!(parse_labels("instance").is_err());
        assert!(parse_labels("1st=x").is_err());
        assert!(parse_labels("a=1,a=2").is_err());
    }
}
