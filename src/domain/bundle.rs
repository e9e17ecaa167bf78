use crate::domain::family::MetricFamily;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope carried over the broker: one capture timestamp plus the families
/// gathered at that moment.
///
/// `families` may be empty; publishers still emit a timestamp-only bundle as a
/// heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBundle {
    /// Unix UTC time in nanoseconds. Only used as a wall-clock marker for latency.
    pub capture_time: i64,
    pub families: Vec<MetricFamily>,
}

impl MetricBundle {
    pub fn new(capture_time: i64, families: Vec<MetricFamily>) -> Self {
        Self {
            capture_time,
            families,
        }
    }

    /// Bundle stamped with the current wall clock
    pub fn capture(families: Vec<MetricFamily>) -> Self {
        Self::new(now_nanos(), families)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.families.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.capture_time)
    }
}

/// Current wall clock as Unix nanoseconds, saturating far outside the representable range
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
