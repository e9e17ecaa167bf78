//! Composition of metric sources.

use crate::domain::errors::GatherError;
use crate::domain::family::MetricFamily;
use crate::domain::ports::Gatherer;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Fans a gather out to several sources in order, concatenating their families.
/// The first error short-circuits the whole gather.
#[derive(Clone, Default)]
pub struct Gatherers {
    members: Vec<Arc<dyn Gatherer>>,
}

impl Gatherers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gatherer: Arc<dyn Gatherer>) -> Self {
        self.members.push(gatherer);
        self
    }

    pub fn push(&mut self, gatherer: Arc<dyn Gatherer>) {
        self.members.push(gatherer);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl FromIterator<Arc<dyn Gatherer>> for Gatherers {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Gatherer>>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Gatherer for Gatherers {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let mut families = Vec::new();
        for member in &self.members {
            families.extend(member.gather().await?);
        }
        Ok(families)
    }
}

/// Adapts an async closure into a [`Gatherer`]
pub struct GathererFn<F>(pub F);

#[async_trait]
impl<F, Fut> Gatherer for GathererFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<MetricFamily>, GatherError>> + Send,
{
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        (self.0)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed(names: &'static [&'static str]) -> Arc<dyn Gatherer> {
        Arc::new(GathererFn(move || async move {
            Ok::<_, GatherError>(
                names
                    .iter()
                    .map(|n| MetricFamily::gauge(*n, "", 1.0))
                    .collect::<Vec<_>>(),
            )
        }))
    }

    #[tokio::test]
    async fn test_concatenates_in_member_order() {
        let gatherers = Gatherers::new().with(fixed(&["a", "b"])).with(fixed(&["c"]));

        let names: Vec<_> = gatherers
            .gather()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_first_error_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let after: Arc<dyn Gatherer> = Arc::new(GathererFn(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok::<Vec<MetricFamily>, GatherError>(vec![]) }
        }));
        let failing: Arc<dyn Gatherer> = Arc::new(GathererFn(|| async {
            Err::<Vec<MetricFamily>, _>(GatherError::Other("scrape target down".to_string()))
        }));

        let gatherers: Gatherers = vec![fixed(&["a"]), failing, after].into_iter().collect();
        let err = gatherers.gather().await.unwrap_err();

        assert!(err.to_string().contains("scrape target down"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_composite_gathers_nothing() {
        assert!(Gatherers::new().gather().await.unwrap().is_empty());
    }
}
