//! Pull-side collaborator: turns an HTTP text-format endpoint into a metric source.

use crate::domain::errors::GatherError;
use crate::domain::family::MetricFamily;
use crate::domain::ports::Gatherer;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::exposition::parse_text;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use tracing::{debug, warn};

/// Scrapes one `/metrics` endpoint per gather
pub struct ScrapeGatherer {
    url: String,
    client: ClientWithMiddleware,
}

impl ScrapeGatherer {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, HttpClientFactory::create_client())
    }

    pub fn with_client(url: impl Into<String>, client: ClientWithMiddleware) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET the endpoint, require `200 OK`, parse the body as text exposition
    pub async fn fetch(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| GatherError::Fetch {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Scrape of {} returned HTTP status {}", self.url, status);
            return Err(GatherError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| GatherError::Fetch {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        let families = parse_text(&body).map_err(|source| GatherError::Parse {
            url: self.url.clone(),
            source,
        })?;
        debug!("Scraped {} families from {}", families.len(), self.url);
        Ok(families)
    }
}

#[async_trait]
impl Gatherer for ScrapeGatherer {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        self.fetch().await
    }
}
