//! A single news search backend. Concrete vendor wiring (request
//! signing, response schema) is out of scope; this is the seam an adapter fills.

use crate::models::NewsItem;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NewsQuery {
    pub text: String,
    pub ticker: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,
    #[error("transient: {0}")]
    Transient(String),
    #[error("no providers available")]
    NoProvidersAvailable,
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    fn id(&self) -> &'static str;
    async fn search(&self, query: &NewsQuery, api_key: Option<&str>) -> Result<Vec<NewsItem>, ProviderError>;
}

/// A generic REST search provider (e.g. a news-search aggregator API).
pub struct RestSearchProvider {
    id: &'static str,
    client: reqwest::Client,
    base_url: String,
}

impl RestSearchProvider {
    pub fn new(id: &'static str, client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            id,
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    title: String,
    snippet: String,
    url: String,
    published_at: Option<chrono::DateTime<Utc>>,
    source: Option<String>,
    score: Option<f64>,
}

#[async_trait]
impl NewsProvider for RestSearchProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn search(&self, query: &NewsQuery, api_key: Option<&str>) -> Result<Vec<NewsItem>, ProviderError> {
        let mut req = self.client.get(&self.base_url).query(&[("q", &query.text)]);
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| ProviderError::Transient(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(ProviderError::Transient(format!("http {}", resp.status())));
        }
        let body: SearchResponse = resp.json().await.map_err(|e| ProviderError::Transient(e.to_string()))?;
        debug!(provider = self.id, results = body.results.len(), "news search completed");
        Ok(body
            .results
            .into_iter()
            .map(|r| {
                let fingerprint = NewsItem::fingerprint_of(&r.title, &r.url);
                NewsItem {
                    title: r.title,
                    snippet: r.snippet,
                    url: r.url,
                    published_at: r.published_at.unwrap_or_else(Utc::now),
                    source: r.source.unwrap_or_else(|| self.id.to_string()),
                    fingerprint,
                    relevance: r.score.unwrap_or(0.5),
                }
            })
            .collect())
    }
}
