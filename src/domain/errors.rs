use thiserror::Error;

/// Bundle could not be serialized
#[derive(Debug, Error)]
#[error("Failed to encode bundle: {0}")]
pub struct EncodeError(#[from] pub bincode::Error);

/// Payload is not a valid bundle encoding
#[derive(Debug, Error)]
#[error("Failed to decode bundle ({len} bytes): {source}")]
pub struct DecodeError {
    pub len: usize,
    #[source]
    pub source: bincode::Error,
}

/// Text exposition could not be parsed
#[derive(Debug, Error)]
#[error("Invalid exposition at line {line}: {reason}")]
pub struct ExpositionError {
    pub line: usize,
    pub reason: String,
}

impl ExpositionError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Errors returned by a metric source
#[derive(Debug, Error)]
pub enum GatherError {
    #[error("GET {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("GET {url} returned HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("Reading text format from {url} failed: {source}")]
    Parse {
        url: String,
        #[source]
        source: ExpositionError,
    },

    #[error("Self-metrics registry could not be gathered: {0}")]
    Registry(String),

    #[error("{0}")]
    Other(String),
}

/// Errors related to the message broker
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {reason}")]
    Connect { reason: String },

    #[error("Subscription {subscription} failed: {reason}")]
    Subscribe {
        subscription: String,
        reason: String,
    },

    #[error("Publish to {topic} rejected: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Delivery stream closed: {reason}")]
    Stream { reason: String },
}

/// Errors surfaced by one publish cycle
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Gathering metrics failed: {0}")]
    Gather(#[from] GatherError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Broker failed to acknowledge message {message_id}: {reason}")]
    Ack { message_id: u16, reason: String },
}
