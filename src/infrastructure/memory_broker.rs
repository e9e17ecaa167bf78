//! In-process message broker.
//!
//! Stands in for the MQTT bridge on the publish side and the streaming-pull
//! subscription on the receive side: every published message fans in to every open
//! subscription, stamped with the publishing client's attributes (the way a device
//! bridge attaches `deviceId` to each message it forwards).

use crate::domain::errors::BrokerError;
use crate::domain::ports::{
    Acknowledge, BrokerPublisher, Delivery, DeliveryStream, DeliveryToken, QoS, Subscriber,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Attribute carrying the topic a message was published on
pub const TOPIC_ATTRIBUTE: &str = "subTopic";

#[derive(Default)]
struct BrokerState {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Delivery>>>,
    ack_delay: Mutex<Duration>,
    publish_error: Mutex<Option<String>>,
    subscribe_error: Mutex<Option<String>>,
    next_id: AtomicU32,
    published: AtomicUsize,
    acked: Arc<AtomicUsize>,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that acknowledges each publish after `ack_delay`
    pub fn with_ack_delay(ack_delay: Duration) -> Self {
        Self {
            state: Arc::new(BrokerState {
                ack_delay: Mutex::new(ack_delay),
                ..BrokerState::default()
            }),
        }
    }

    pub async fn set_ack_delay(&self, ack_delay: Duration) {
        *self.state.ack_delay.lock().await = ack_delay;
    }

    /// Make every following publish fail with `reason`
    pub async fn reject_publishes(&self, reason: impl Into<String>) {
        *self.state.publish_error.lock().await = Some(reason.into());
    }

    /// Make every following subscribe fail with `reason`
    pub async fn refuse_subscriptions(&self, reason: impl Into<String>) {
        *self.state.subscribe_error.lock().await = Some(reason.into());
    }

    /// Publishing client whose messages carry `attributes`
    pub fn client(&self, attributes: HashMap<String, String>) -> MemoryClient {
        MemoryClient {
            broker: self.clone(),
            attributes,
        }
    }

    /// Hand a raw payload straight to every subscription
    pub async fn inject(&self, payload: Vec<u8>, attributes: HashMap<String, String>) {
        self.deliver(payload, attributes).await;
    }

    /// End every open delivery stream
    pub async fn close(&self) {
        self.state.subscribers.lock().await.clear();
    }

    pub fn published(&self) -> usize {
        self.state.published.load(Ordering::SeqCst)
    }

    /// Deliveries acknowledged by subscribers
    pub fn acked(&self) -> usize {
        self.state.acked.load(Ordering::SeqCst)
    }

    fn next_message_id(&self) -> u16 {
        // MQTT packet identifiers are 1..=65535
        let n = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        (n % u32::from(u16::MAX)) as u16 + 1
    }

    async fn deliver(&self, payload: Vec<u8>, attributes: HashMap<String, String>) {
        let mut subscribers = self.state.subscribers.lock().await;
        let publish_time = Utc::now();
        subscribers.retain(|tx| {
            let delivery = Delivery::new(
                payload.clone(),
                attributes.clone(),
                publish_time,
                Box::new(MemoryAck {
                    acked: self.state.acked.clone(),
                }),
            );
            tx.send(delivery).is_ok()
        });
        debug!(
            "MemoryBroker: delivered {} bytes to {} subscriptions",
            payload.len(),
            subscribers.len()
        );
    }
}

/// Publishing side of [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryClient {
    broker: MemoryBroker,
    attributes: HashMap<String, String>,
}

#[async_trait]
impl BrokerPublisher for MemoryClient {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<DeliveryToken, BrokerError> {
        if let Some(reason) = self.broker.state.publish_error.lock().await.clone() {
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason,
            });
        }

        let message_id = self.broker.next_message_id();
        let (token, ack) = DeliveryToken::new(message_id);
        self.broker.state.published.fetch_add(1, Ordering::SeqCst);

        let mut attributes = self.attributes.clone();
        attributes.insert(TOPIC_ATTRIBUTE.to_string(), topic.to_string());
        let ack_delay = *self.broker.state.ack_delay.lock().await;
        let broker = self.broker.clone();
        debug!(
            "MemoryBroker: accepted message {} on {} (qos {})",
            message_id,
            topic,
            qos.level()
        );

        tokio::spawn(async move {
            tokio::time::sleep(ack_delay).await;
            broker.deliver(payload, attributes).await;
            ack.ack();
        });

        Ok(token)
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn subscribe(&self, subscription: &str) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        if let Some(reason) = self.state.subscribe_error.lock().await.clone() {
            return Err(BrokerError::Subscribe {
                subscription: subscription.to_string(),
                reason,
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.subscribers.lock().await.push(tx);
        debug!("MemoryBroker: subscription {} opened", subscription);
        Ok(Box::new(MemoryStream { rx }))
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl DeliveryStream for MemoryStream {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        self.rx.recv().await.map(Ok)
    }
}

struct MemoryAck {
    acked: Arc<AtomicUsize>,
}

impl Acknowledge for MemoryAck {
    fn ack(self: Box<Self>) {
        self.acked.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::AckOutcome;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_publish_fans_in_with_client_attributes() {
        let broker = MemoryBroker::new();
        let mut stream = broker.subscribe("metrics").await.unwrap();
        let client = broker.client(attrs(&[("deviceId", "dev-1")]));

        let token = client
            .publish("/devices/dev-1/events", QoS::AtLeastOnce, b"abc".to_vec())
            .await
            .unwrap();
        assert_eq!(
            token.wait_timeout(Duration::from_secs(1)).await,
            AckOutcome::Acked
        );

        let delivery = stream.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"abc");
        assert_eq!(delivery.attribute("deviceId"), Some("dev-1"));
        assert_eq!(
            delivery.attribute(TOPIC_ATTRIBUTE),
            Some("/devices/dev-1/events")
        );

        delivery.ack();
        assert_eq!(broker.acked(), 1);
        assert_eq!(broker.published(), 1);
    }

    #[tokio::test]
    async fn test_message_ids_skip_zero() {
        let broker = MemoryBroker::new();
        broker.state.next_id.store(u32::from(u16::MAX) - 1, Ordering::SeqCst);
        assert_eq!(broker.next_message_id(), u16::MAX);
        assert_eq!(broker.next_message_id(), 1);
    }

    #[tokio::test]
    async fn test_rejected_publish_and_subscribe() {
        let broker = MemoryBroker::new();
        broker.reject_publishes("not authorized").await;
        broker.refuse_subscriptions("unknown subscription").await;

        let client = broker.client(HashMap::new());
        assert!(matches!(
            client.publish("t", QoS::AtLeastOnce, vec![]).await,
            Err(BrokerError::Publish { .. })
        ));
        assert!(matches!(
            broker.subscribe("s").await,
            Err(BrokerError::Subscribe { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let broker = MemoryBroker::new();
        let mut stream = broker.subscribe("metrics").await.unwrap();
        broker.close().await;
        assert!(stream.next_delivery().await.is_none());
    }
}
