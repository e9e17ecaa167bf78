use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Publish timestamps of messages still waiting for a broker acknowledgment,
/// keyed by message id.
#[derive(Debug, Default)]
pub struct PendingAcks {
    sent_at: HashMap<u16, Instant>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `message_id`. The entry lives exactly as long as the guard.
    pub fn begin(&mut self, message_id: u16) -> PendingAck<'_> {
        self.sent_at.insert(message_id, Instant::now());
        PendingAck {
            table: self,
            message_id,
        }
    }

    pub fn len(&self) -> usize {
        self.sent_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent_at.is_empty()
    }
}

/// RAII guard for one in-flight acknowledgment
pub struct PendingAck<'a> {
    table: &'a mut PendingAcks,
    message_id: u16,
}

impl PendingAck<'_> {
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// Time since `begin`; the entry is removed as the guard drops
    pub fn finish(self) -> Duration {
        self.table
            .sent_at
            .get(&self.message_id)
            .map(Instant::elapsed)
            .unwrap_or_default()
    }
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        self.table.sent_at.remove(&self.message_id);
    }
}
