use crate::domain::errors::{BrokerError, GatherError};
use crate::domain::family::MetricFamily;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;

/// Anything that can produce a metric snapshot on demand.
#[async_trait]
pub trait Gatherer: Send + Sync {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError>;
}

/// MQTT-style delivery guarantee requested on publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// How waiting on a delivery token ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    TimedOut,
    Failed(String),
}

/// Handle returned by a publish; resolves once the broker acknowledges receipt.
#[derive(Debug)]
pub struct DeliveryToken {
    message_id: u16,
    ack_rx: oneshot::Receiver<Result<(), String>>,
}

/// Transport side of a [`DeliveryToken`]
#[derive(Debug)]
pub struct AckHandle {
    ack_tx: oneshot::Sender<Result<(), String>>,
}

impl DeliveryToken {
    pub fn new(message_id: u16) -> (Self, AckHandle) {
        let (ack_tx, ack_rx) = oneshot::channel();
        (Self { message_id, ack_rx }, AckHandle { ack_tx })
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub async fn wait_timeout(self, timeout: Duration) -> AckOutcome {
        match tokio::time::timeout(timeout, self.ack_rx).await {
            Ok(Ok(Ok(()))) => AckOutcome::Acked,
            Ok(Ok(Err(reason))) => AckOutcome::Failed(reason),
            Ok(Err(_)) => AckOutcome::Failed("transport dropped the delivery token".to_string()),
            Err(_) => AckOutcome::TimedOut,
        }
    }
}

impl AckHandle {
    pub fn ack(self) {
        let _ = self.ack_tx.send(Ok(()));
    }

    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.ack_tx.send(Err(reason.into()));
    }
}

#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<DeliveryToken, BrokerError>;
}

/// Acknowledges one delivered message back to the broker
pub trait Acknowledge: Send {
    fn ack(self: Box<Self>);
}

/// One message handed over by a subscription
pub struct Delivery {
    pub payload: Vec<u8>,
    pub attributes: HashMap<String, String>,
    pub publish_time: DateTime<Utc>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
        publish_time: DateTime<Utc>,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            payload,
            attributes,
            publish_time,
            acker,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn ack(self) {
        self.acker.ack();
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("attributes", &self.attributes)
            .field("publish_time", &self.publish_time)
            .finish()
    }
}

/// Streaming-pull side of a subscription.
///
/// `next_delivery` must be cancel-safe: the receiver races it against shutdown.
#[async_trait]
pub trait DeliveryStream: Send {
    /// `None` once the stream has ended
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, subscription: &str) -> Result<Box<dyn DeliveryStream>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_resolves_on_ack() {
        let (token, handle) = DeliveryToken::new(7);
        assert_eq!(token.message_id(), 7);
        handle.ack();
        assert_eq!(
            token.wait_timeout(Duration::from_secs(1)).await,
            AckOutcome::Acked
        );
    }

    #[tokio::test]
    async fn test_token_times_out_without_ack() {
        let (token, _handle) = DeliveryToken::new(1);
        assert_eq!(
            token.wait_timeout(Duration::from_millis(20)).await,
            AckOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn test_token_reports_transport_failure() {
        let (token, handle) = DeliveryToken::new(2);
        handle.fail("not authorized");
        assert_eq!(
            token.wait_timeout(Duration::from_secs(1)).await,
            AckOutcome::Failed("not authorized".to_string())
        );

        let (token, handle) = DeliveryToken::new(3);
        drop(handle);
        assert!(matches!(
            token.wait_timeout(Duration::from_secs(1)).await,
            AckOutcome::Failed(_)
        ));
    }
}
