use crate::domain::bundle::MetricBundle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest bundle received for one source
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBundle {
    pub bundle: MetricBundle,
    pub received_at: DateTime<Utc>,
}

/// Point-in-time view of one cache entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub families: usize,
    pub captured_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// Latest bundle per source identity.
///
/// Writers replace whole entries; readers clone the `Arc`s under a short read lock
/// and do the rest of their work outside it, so a scrape never waits on more than
/// a map walk.
#[derive(Debug, Default)]
pub struct SourceCache {
    entries: RwLock<BTreeMap<String, Arc<CachedBundle>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bundle` as the latest for `source`. Returns true if the source is new.
    pub async fn replace(&self, source: &str, bundle: MetricBundle) -> bool {
        let entry = Arc::new(CachedBundle {
            bundle,
            received_at: Utc::now(),
        });
        self.entries
            .write()
            .await
            .insert(source.to_string(), entry)
            .is_none()
    }

    /// Entries in source order
    pub async fn snapshot(&self) -> Vec<(String, Arc<CachedBundle>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(source, entry)| (source.clone(), entry.clone()))
            .collect()
    }

    pub async fn get(&self, source: &str) -> Option<Arc<CachedBundle>> {
        self.entries.read().await.get(source).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn statuses(&self) -> Vec<SourceStatus> {
        self.snapshot()
            .await
            .into_iter()
            .map(|(source, entry)| SourceStatus {
                source,
                families: entry.bundle.families.len(),
                captured_at: entry.bundle.captured_at(),
                received_at: entry.received_at,
            })
            .collect()
    }
}
