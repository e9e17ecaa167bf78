//! Self-observability of the relay.
//!
//! The relay measures itself with a Prometheus registry ([`RelayMetrics`]) that is
//! both served locally and, on the publishing side, shipped inside every bundle.

pub mod latency_tracker;
pub mod metrics;
pub mod server;

pub use latency_tracker::{PendingAck, PendingAcks};
pub use metrics::{Labels, RelayMetrics, SOURCE_LABEL};
pub use server::{METRICS_PATH, serve_metrics, serve_on};
