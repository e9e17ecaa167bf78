//! Receiving half of the relay.
//!
//! Consumes the broker's delivery stream, keeps the latest bundle per source and
//! serves the merge of all of them through [`Gatherer`].

use crate::application::source_cache::{SourceCache, SourceStatus};
use crate::domain::bundle::now_nanos;
use crate::domain::errors::{BrokerError, GatherError};
use crate::domain::family::MetricFamily;
use crate::domain::ports::{Delivery, DeliveryStream, Gatherer, Subscriber};
use crate::infrastructure::codec;
use crate::infrastructure::core::Shutdown;
use crate::infrastructure::observability::RelayMetrics;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Source used when a message lacks the identity attribute
pub const UNKNOWN_SOURCE: &str = "unknown";
pub const DEFAULT_IDENTITY_ATTRIBUTE: &str = "deviceId";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Message attribute naming the source; labels the receive-latency series
    pub identity_attribute: String,
    /// Attribute keying the cache, when it must differ from `identity_attribute`
    pub cache_key_attribute: Option<String>,
    /// Upper bound on concurrently running message handlers
    pub max_in_flight: usize,
    /// Label injected into every relayed sample, valued with the source id
    pub source_label: Option<String>,
    /// Entries not refreshed within this window are left out of `gather`
    pub max_staleness: Option<Duration>,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            identity_attribute: DEFAULT_IDENTITY_ATTRIBUTE.to_string(),
            cache_key_attribute: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            source_label: None,
            max_staleness: None,
        }
    }
}

/// What the handler did with one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Decoded and stored as the latest bundle for this cache key
    Cached { source: String },
    /// Decoded, but carried no families; cache left untouched
    Heartbeat { source: String },
    /// Payload was not a bundle; acked and dropped
    Rejected,
}

#[derive(Clone)]
pub struct Receiver {
    cache: Arc<SourceCache>,
    metrics: RelayMetrics,
    options: Arc<ReceiverOptions>,
}

impl Receiver {
    pub fn new(metrics: RelayMetrics, options: ReceiverOptions) -> Self {
        Self {
            cache: Arc::new(SourceCache::new()),
            metrics,
            options: Arc::new(options),
        }
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub fn options(&self) -> &ReceiverOptions {
        &self.options
    }

    /// Subscribe and handle deliveries until shutdown or end of stream.
    ///
    /// Failing to subscribe is fatal and returned as is; there is no reconnect
    /// here.
    pub async fn start(
        &self,
        subscriber: &dyn Subscriber,
        subscription: &str,
        shutdown: Shutdown,
    ) -> Result<(), BrokerError> {
        let stream = subscriber.subscribe(subscription).await?;
        info!("Receiver: subscribed to {}", subscription);
        self.consume(stream, shutdown).await
    }

    /// Handle deliveries from an open subscription until shutdown or end of stream.
    ///
    /// On shutdown the stream stops being polled and every in-flight handler is
    /// allowed to finish before this returns.
    pub async fn consume(
        &self,
        mut stream: Box<dyn DeliveryStream>,
        mut shutdown: Shutdown,
    ) -> Result<(), BrokerError> {
        info!(
            "Receiver: consuming deliveries (max {} in flight)",
            self.options.max_in_flight
        );

        let limiter = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let mut in_flight = JoinSet::new();
        let mut result = Ok(());

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                next = stream.next_delivery() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let receiver = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        receiver.handle_delivery(delivery).await
                    });
                }
                Some(Err(e)) => {
                    error!("Receiver: delivery stream failed: {}", e);
                    result = Err(e);
                    break;
                }
                None => {
                    info!("Receiver: delivery stream ended");
                    break;
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Receiver: message handler panicked: {}", e);
                }
            }
        }

        let draining = in_flight.len();
        if draining > 0 {
            info!("Receiver: waiting for {} in-flight handlers", draining);
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Receiver: message handler panicked: {}", e);
            }
        }

        info!("Receiver stopped");
        result
    }

    /// Handle one delivered message. Safe to call concurrently.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Handled {
        let bundle = match codec::decode(&delivery.payload) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(
                    "Receiver: dropping undecodable message (attributes {:?}): {}",
                    delivery.attributes, e
                );
                self.metrics.inc_decode_failures();
                delivery.ack();
                return Handled::Rejected;
            }
        };

        let source = self.source_of(&delivery, &self.options.identity_attribute);
        let cache_key = match &self.options.cache_key_attribute {
            Some(attribute) => self.source_of(&delivery, attribute),
            None => source.clone(),
        };

        let latency = receive_latency(bundle.capture_time);
        self.metrics
            .observe_receive_latency(&source, latency.as_secs_f64());
        debug!(
            "Receiver: bundle from {} ({} families), end-to-end {:?}, broker transit {}ms",
            source,
            bundle.families.len(),
            latency,
            (Utc::now() - delivery.publish_time).num_milliseconds()
        );

        let handled = if bundle.is_heartbeat() {
            Handled::Heartbeat { source: cache_key }
        } else {
            if self.cache.replace(&cache_key, bundle).await {
                info!("Receiver: first bundle from new source {}", cache_key);
            }
            Handled::Cached { source: cache_key }
        };

        delivery.ack();
        handled
    }

    /// Status of every cached source, in source order
    pub async fn sources(&self) -> Vec<SourceStatus> {
        self.cache.statuses().await
    }

    fn source_of(&self, delivery: &Delivery, attribute: &str) -> String {
        match delivery.attribute(attribute) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => {
                warn!(
                    "Receiver: message without {:?} attribute, attributing to {}",
                    attribute, UNKNOWN_SOURCE
                );
                UNKNOWN_SOURCE.to_string()
            }
        }
    }
}

/// Wall-clock time since capture; clock skew between devices is clamped to zero
fn receive_latency(capture_time: i64) -> Duration {
    let nanos = now_nanos().saturating_sub(capture_time);
    Duration::from_nanos(nanos.max(0) as u64)
}

#[async_trait]
impl Gatherer for Receiver {
    /// Concatenation of the latest families of every cached source. Never fails.
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let snapshot = self.cache.snapshot().await;
        let now = Utc::now();

        let mut families = Vec::new();
        for (source, entry) in snapshot {
            if let Some(max_staleness) = self.options.max_staleness {
                let age = (now - entry.received_at).to_std().unwrap_or_default();
                if age > max_staleness {
                    debug!("Receiver: skipping stale source {} ({:?} old)", source, age);
                    continue;
                }
            }
            match &self.options.source_label {
                Some(label) => families.extend(
                    entry
                        .bundle
                        .families
                        .iter()
                        .map(|family| family.with_label(label, &source)),
                ),
                None => families.extend(entry.bundle.families.iter().cloned()),
            }
        }
        Ok(families)
    }
}
