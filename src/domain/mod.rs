// Envelope carried between publisher and receiver
pub mod bundle;

// Metric family snapshot model
pub mod family;

// Port interfaces (gatherers, broker)
pub mod ports;

// Domain-specific error types
pub mod errors;

pub use bundle::MetricBundle;
pub use family::{MetricFamily, MetricKind};
