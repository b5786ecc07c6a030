//! News Service (C4)
//! Mission: multi-provider search fanout with key rotation, dedup, and
//! relevance ranking. Key-pool rotation reuses the same API-key cooldown
//! pattern used for rate-limited vendor calls elsewhere in the fetcher pool.

mod dedup;
mod keypool;
mod provider;

pub use provider::{NewsProvider, NewsQuery, ProviderError, RestSearchProvider};

use crate::models::{NewsIntel, NewsItem, Ticker};
use dedup::FingerprintCache;
use keypool::KeyPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Up to 5 templated query dimensions fanned out per ticker.
fn query_dimensions(ticker: &Ticker, company_name: &str) -> Vec<String> {
    vec![
        format!("{company_name} stock news"),
        format!("{ticker} earnings"),
        format!("{company_name} analyst rating"),
        format!("{ticker} latest announcement"),
        format!("{company_name} industry outlook"),
    ]
}

pub struct NewsService {
    providers: Vec<Arc<dyn NewsProvider>>,
    key_pools: std::collections::HashMap<&'static str, KeyPool>,
    dedup_cache: FingerprintCache,
    max_items: usize,
}

impl NewsService {
    pub fn new(providers: Vec<Arc<dyn NewsProvider>>, keys_by_provider: std::collections::HashMap<&'static str, Vec<String>>, max_items: usize) -> Self {
        let key_pools = keys_by_provider
            .into_iter()
            .map(|(provider, keys)| (provider, KeyPool::new(keys, Duration::from_secs(60))))
            .collect();
        Self {
            providers,
            key_pools,
            dedup_cache: FingerprintCache::new(500),
            max_items,
        }
    }

    /// Run the full fanout for one ticker: up to 5 dimensions x available
    /// providers, dedup by fingerprint, rank, truncate.
    pub async fn gather(&self, ticker: &Ticker, company_name: &str) -> NewsIntel {
        let dimensions = query_dimensions(ticker, company_name);
        let mut collected: Vec<NewsItem> = Vec::new();
        let mut any_success = false;

        for dimension in &dimensions {
            let query = NewsQuery {
                text: dimension.clone(),
                ticker: ticker.as_str().to_string(),
            };
            match self.run_one_dimension(&query).await {
                Ok(items) => {
                    any_success = true;
                    collected.extend(items);
                }
                Err(e) => warn!(dimension = %dimension, error = %e, "news dimension failed"),
            }
        }

        let mut deduped = Vec::new();
        for item in collected {
            if self.dedup_cache.insert_if_new(&item.fingerprint) {
                deduped.push(item);
            }
        }
        deduped.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
        deduped.truncate(self.max_items);

        NewsIntel {
            items: deduped,
            search_fallback: !any_success,
        }
    }

    /// Try each provider in order for a single query, rotating keys and
    /// respecting 429 cooldown.
    async fn run_one_dimension(&self, query: &NewsQuery) -> Result<Vec<NewsItem>, ProviderError> {
        let mut last_err = ProviderError::NoProvidersAvailable;
        for provider in &self.providers {
            let pool = self.key_pools.get(provider.id());
            let key = match pool {
                Some(p) => match p.next_available() {
                    Some(k) => Some(k),
                    None => {
                        debug!(provider = provider.id(), "all keys cooling down");
                        continue;
                    }
                },
                None => None,
            };
            match provider.search(query, key.as_deref()).await {
                Ok(items) => return Ok(items),
                Err(ProviderError::RateLimited) => {
                    if let (Some(pool), Some(key)) = (pool, &key) {
                        pool.mark_cooldown(key);
                    }
                    last_err = ProviderError::RateLimited;
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}
