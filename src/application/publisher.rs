//! Publishing half of the relay.
//!
//! One cycle: gather from the configured source, wrap the families in a
//! [`MetricBundle`], encode, publish at-least-once and time the broker ack.

use crate::domain::bundle::MetricBundle;
use crate::domain::errors::PublishError;
use crate::domain::ports::{AckOutcome, BrokerPublisher, Gatherer, QoS};
use crate::infrastructure::codec;
use crate::infrastructure::core::Shutdown;
use crate::infrastructure::observability::{PendingAcks, RelayMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub topic: String,
    pub qos: QoS,
    /// Upper bound on waiting for the broker to acknowledge one publish
    pub ack_timeout: Duration,
    /// Cadence the caller should invoke [`Publisher::publish`] at
    pub interval: Duration,
}

impl PublisherOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtLeastOnce,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }
}

/// What one publish cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub message_id: u16,
    pub families: usize,
    pub payload_bytes: usize,
    pub ack_latency: Duration,
    pub outcome: AckOutcome,
}

pub struct Publisher {
    source: Arc<dyn Gatherer>,
    broker: Arc<dyn BrokerPublisher>,
    metrics: RelayMetrics,
    options: PublisherOptions,
    pending: PendingAcks,
}

impl Publisher {
    pub fn new(
        source: Arc<dyn Gatherer>,
        broker: Arc<dyn BrokerPublisher>,
        metrics: RelayMetrics,
        options: PublisherOptions,
    ) -> Self {
        Self {
            source,
            broker,
            metrics,
            options,
            pending: PendingAcks::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.options.interval
    }

    pub fn options(&self) -> &PublisherOptions {
        &self.options
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Publishes whose acknowledgment is still being awaited
    pub fn pending_acks(&self) -> usize {
        self.pending.len()
    }

    /// Run one publish cycle.
    ///
    /// Takes `&mut self`: cycles must not overlap. An ack timeout is not an error,
    /// it only shows up as a large latency.
    pub async fn publish(&mut self) -> Result<PublishReport, PublishError> {
        let families = self.source.gather().await?;
        if families.is_empty() {
            info!("Publisher: no metrics gathered, publishing heartbeat bundle");
        }

        let bundle = MetricBundle::capture(families);
        let payload = codec::encode(&bundle)?;
        let payload_bytes = payload.len();
        let family_count = bundle.families.len();

        let token = self
            .broker
            .publish(&self.options.topic, self.options.qos, payload)
            .await?;
        let message_id = token.message_id();

        let pending = self.pending.begin(message_id);
        let outcome = token.wait_timeout(self.options.ack_timeout).await;
        let ack_latency = pending.finish();

        self.metrics
            .observe_ack_latency(ack_latency.as_secs_f64() * 1000.0);

        match &outcome {
            AckOutcome::Acked => debug!(
                "Publisher: message {} acked in {:?} ({} families, {} bytes)",
                message_id, ack_latency, family_count, payload_bytes
            ),
            AckOutcome::TimedOut => warn!(
                "Publisher: message {} not acked within {:?}",
                message_id, self.options.ack_timeout
            ),
            AckOutcome::Failed(reason) => {
                warn!("Publisher: message {} ack failed: {}", message_id, reason);
                return Err(PublishError::Ack {
                    message_id,
                    reason: reason.clone(),
                });
            }
        }

        Ok(PublishReport {
            message_id,
            families: family_count,
            payload_bytes,
            ack_latency,
            outcome,
        })
    }

    /// Publish on the configured interval until shutdown. Failed cycles are logged
    /// and the next one proceeds independently.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(
            "Publisher: publishing to {} every {:?}",
            self.options.topic, self.options.interval
        );

        let mut ticker = time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    match self.publish().await {
                        Ok(report) => info!(
                            "Publisher: published message {} ({} families, ack {:?})",
                            report.message_id, report.families, report.ack_latency
                        ),
                        Err(e) => warn!("Publisher: cycle failed: {}", e),
                    }
                }
            }
        }

        info!("Publisher stopped");
    }
}
