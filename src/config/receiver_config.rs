//! Receiver configuration parsing from environment variables.

use super::{parse_labels, parse_usize};
use crate::application::receiver::{
    DEFAULT_IDENTITY_ATTRIBUTE, DEFAULT_MAX_IN_FLIGHT, ReceiverOptions,
};
use crate::infrastructure::observability::Labels;
use anyhow::{Context, Result, bail};
use std::env;
use std::time::Duration;

pub const DEFAULT_SUBSCRIPTION: &str = "metrics";

/// Receiver environment configuration
#[derive(Debug, Clone)]
pub struct ReceiverEnvConfig {
    pub subscription: String,
    pub identity_attribute: String,
    pub cache_key_attribute: Option<String>,
    pub max_in_flight: usize,
    pub source_label: Option<String>,
    pub max_staleness: Option<Duration>,
    /// Static labels on the receiver's own self-metrics
    pub labels: Labels,
}

impl ReceiverEnvConfig {
    pub fn from_env() -> Result<Self> {
        let max_in_flight = parse_usize("RELAY_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?;
        if max_in_flight == 0 {
            bail!("RELAY_MAX_IN_FLIGHT must be greater than 0");
        }

        let max_staleness = match non_empty("RELAY_MAX_STALENESS_SECS") {
            Some(raw) => Some(Duration::from_secs(
                raw.parse::<u64>()
                    .context("Failed to parse RELAY_MAX_STALENESS_SECS")?,
            )),
            None => None,
        };

        Ok(Self {
            subscription: env::var("RELAY_SUBSCRIPTION")
                .unwrap_or_else(|_| DEFAULT_SUBSCRIPTION.to_string()),
            identity_attribute: non_empty("RELAY_IDENTITY_ATTRIBUTE")
                .unwrap_or_else(|| DEFAULT_IDENTITY_ATTRIBUTE.to_string()),
            cache_key_attribute: non_empty("RELAY_CACHE_KEY_ATTRIBUTE"),
            max_in_flight,
            source_label: non_empty("RELAY_SOURCE_LABEL"),
            max_staleness,
            labels: parse_labels(&env::var("RELAY_RECEIVER_LABELS").unwrap_or_default())
                .context("Failed to parse RELAY_RECEIVER_LABELS")?,
        })
    }

    pub fn to_options(&self) -> ReceiverOptions {
        ReceiverOptions {
            identity_attribute: self.identity_attribute.clone(),
            cache_key_attribute: self.cache_key_attribute.clone(),
            max_in_flight: self.max_in_flight,
            source_label: self.source_label.clone(),
            max_staleness: self.max_staleness,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
