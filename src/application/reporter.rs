//! Push-based status reporter for the receiving side.
//!
//! Periodically writes a JSON snapshot of the relay cache to stdout, prefixed so log
//! shippers can filter it out of the regular log stream.

use crate::application::receiver::Receiver;
use crate::application::source_cache::SourceStatus;
use crate::infrastructure::core::Shutdown;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const STATUS_PREFIX: &str = "RELAY_STATUS_JSON:";

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub decode_failures: u64,
    pub sources: Vec<SourceStatus>,
}

pub struct StatusReporter {
    receiver: Receiver,
    start_time: Instant,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(receiver: Receiver, interval: Duration) -> Self {
        Self {
            receiver,
            start_time: Instant::now(),
            interval,
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        info!(
            "StatusReporter: reporting relay status every {:?}",
            self.interval
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(self.interval) => {
                    let snapshot = self.collect_snapshot().await;
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => {
                            println!("{}{}", STATUS_PREFIX, json);
                            info!(
                                "Relay: {} sources | {} decode failures | uptime {}s",
                                snapshot.sources.len(),
                                snapshot.decode_failures,
                                snapshot.uptime_seconds
                            );
                        }
                        Err(e) => warn!("Failed to serialize relay status: {}", e),
                    }
                }
            }
        }
    }

    async fn collect_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            decode_failures: self.receiver.metrics().decode_failures(),
            sources: self.receiver.sources().await,
        }
    }
}
