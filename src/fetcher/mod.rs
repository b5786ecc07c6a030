//! Data Fetcher Pool (C3)
//! Mission: uniform access to historical candles, realtime quotes, and names
//! across heterogeneous third-party sources, with priority, fallback, circuit
//! breaking, and caching.

mod cache;
mod circuit;
pub mod sources;

use crate::models::{Candle, Market, Quote, Ticker};
use async_trait::async_trait;
use cache::TtlCache;
use circuit::CircuitBreaker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Errors a concrete source adapter can report. `MarketNotSupported` never
/// counts against the circuit breaker.
#[derive(Debug, Clone)]
pub enum FetchError {
    MarketNotSupported,
    Transient(String),
    Malformed(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::MarketNotSupported => write!(f, "market not supported"),
            FetchError::Transient(m) => write!(f, "transient: {m}"),
            FetchError::Malformed(m) => write!(f, "malformed data: {m}"),
        }
    }
}

/// Outcome of a pool-level call, distinguishing "no source could serve this"
/// from a hard market mismatch.
#[derive(Debug, Clone)]
pub enum PoolError {
    MarketNotSupported,
    AllSourcesFailed,
}

/// One vendor-specific adapter. Vendor client libraries themselves are out of
/// scope; this is the seam a concrete adapter implements.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    fn id(&self) -> &'static str;
    fn base_priority(&self) -> i32;
    fn supports(&self, market: Market) -> bool;
    /// Whether this source can serve a single batched realtime call for N tickers.
    fn supports_batch(&self) -> bool {
        false
    }

    async fn get_history(&self, ticker: &Ticker, days: u32) -> Result<Vec<Candle>, FetchError>;
    async fn get_realtime(&self, ticker: &Ticker) -> Result<Quote, FetchError>;
    async fn get_name(&self, ticker: &Ticker) -> Result<String, FetchError>;

    async fn get_realtime_batch(
        &self,
        tickers: &[Ticker],
    ) -> Result<HashMap<String, Quote>, FetchError> {
        let mut out = HashMap::new();
        for t in tickers {
            if let Ok(q) = self.get_realtime(t).await {
                out.insert(t.as_str().to_string(), q);
            }
        }
        Ok(out)
    }
}

struct Registration {
    source: Arc<dyn DataFetcher>,
    breaker: CircuitBreaker,
    priority_override: Option<i32>,
}

impl Registration {
    fn effective_priority(&self) -> i32 {
        self.priority_override.unwrap_or_else(|| self.source.base_priority())
    }
}

/// The multi-source pool: routing, fallback, circuit breaking, caching.
pub struct FetcherPool {
    sources: Vec<Registration>,
    /// Id of the source that MUST handle US history/realtime regardless of
    /// global priority.
    us_dedicated_source_id: Option<&'static str>,
    quote_cache: TtlCache<String, Quote>,
    history_cache: TtlCache<(String, u32), Vec<Candle>>,
    quote_ttl: Duration,
    history_ttl: Duration,
}

impl FetcherPool {
    pub fn new(
        sources: Vec<Arc<dyn DataFetcher>>,
        priority_overrides: &HashMap<String, i32>,
        us_dedicated_source_id: Option<&'static str>,
        circuit_failure_threshold: u32,
        circuit_cooldown: Duration,
        quote_ttl: Duration,
        history_ttl: Duration,
    ) -> Self {
        let registrations = sources
            .into_iter()
            .map(|source| {
                let priority_override = priority_overrides.get(source.id()).copied();
                Registration {
                    breaker: CircuitBreaker::new(circuit_failure_threshold, circuit_cooldown),
                    source,
                    priority_override,
                }
            })
            .collect();
        Self {
            sources: registrations,
            us_dedicated_source_id,
            quote_cache: TtlCache::new(),
            history_cache: TtlCache::new(),
            quote_ttl,
            history_ttl,
        }
    }

    /// Sources eligible for `market`, ordered by effective priority (lower wins),
    /// with the US-dedicated source pinned first when the market is US.
    fn ordered_sources(&self, market: Market) -> Vec<&Registration> {
        let mut eligible: Vec<&Registration> =
            self.sources.iter().filter(|r| r.source.supports(market)).collect();
        eligible.sort_by_key(|r| r.effective_priority());

        if market == Market::UnitedStates {
            if let Some(dedicated_id) = self.us_dedicated_source_id {
                if let Some(pos) = eligible.iter().position(|r| r.source.id() == dedicated_id) {
                    let dedicated = eligible.remove(pos);
                    eligible.insert(0, dedicated);
                }
            }
        }
        eligible
    }

    pub async fn get_history(&self, ticker: &Ticker, days: u32) -> Result<Vec<Candle>, PoolError> {
        let Some(market) = ticker.market() else {
            return Err(PoolError::MarketNotSupported);
        };
        let cache_key = (ticker.as_str().to_string(), days);
        if let Some(cached) = self.history_cache.get(&cache_key) {
            debug!(ticker = ticker.as_str(), "history cache hit");
            return Ok(cached);
        }

        for reg in self.ordered_sources(market) {
            if !reg.breaker.allow_request() {
                continue;
            }
            match reg.source.get_history(ticker, days).await {
                Ok(candles) => {
                    reg.breaker.record_success();
                    self.history_cache.set(cache_key, candles.clone(), self.history_ttl);
                    return Ok(candles);
                }
                Err(FetchError::MarketNotSupported) => continue,
                Err(e) => {
                    warn!(source = reg.source.id(), error = %e, "history fetch failed");
                    reg.breaker.record_failure();
                }
            }
        }
        Err(PoolError::AllSourcesFailed)
    }

    pub async fn get_realtime(&self, ticker: &Ticker) -> Result<Quote, PoolError> {
        let Some(market) = ticker.market() else {
            return Err(PoolError::MarketNotSupported);
        };
        if let Some(cached) = self.quote_cache.get(&ticker.as_str().to_string()) {
            return Ok(cached);
        }

        for reg in self.ordered_sources(market) {
            if !reg.breaker.allow_request() {
                continue;
            }
            match reg.source.get_realtime(ticker).await {
                Ok(quote) => {
                    reg.breaker.record_success();
                    self.quote_cache
                        .set(ticker.as_str().to_string(), quote.clone(), self.quote_ttl);
                    return Ok(quote);
                }
                Err(FetchError::MarketNotSupported) => continue,
                Err(e) => {
                    warn!(source = reg.source.id(), error = %e, "realtime fetch failed");
                    reg.breaker.record_failure();
                }
            }
        }
        Err(PoolError::AllSourcesFailed)
    }

    pub async fn get_name(&self, ticker: &Ticker) -> Result<String, PoolError> {
        let Some(market) = ticker.market() else {
            return Err(PoolError::MarketNotSupported);
        };
        for reg in self.ordered_sources(market) {
            if !reg.breaker.allow_request() {
                continue;
            }
            match reg.source.get_name(ticker).await {
                Ok(name) => {
                    reg.breaker.record_success();
                    return Ok(name);
                }
                Err(FetchError::MarketNotSupported) => continue,
                Err(e) => {
                    reg.breaker.record_failure();
                    debug!(source = reg.source.id(), error = %e, "name resolution failed");
                }
            }
        }
        Err(PoolError::AllSourcesFailed)
    }

    /// Batch prefetch realtime quotes for N tickers sharing a market, using
    /// one source call per eligible batch-capable source.
    pub async fn prefetch_realtime(&self, tickers: &[Ticker]) {
        let mut by_market: HashMap<Market, Vec<Ticker>> = HashMap::new();
        for t in tickers {
            if let Some(m) = t.market() {
                by_market.entry(m).or_default().push(t.clone());
            }
        }
        for (market, group) in by_market {
            for reg in self.ordered_sources(market) {
                if !reg.source.supports_batch() || !reg.breaker.allow_request() {
                    continue;
                }
                match reg.source.get_realtime_batch(&group).await {
                    Ok(quotes) => {
                        reg.breaker.record_success();
                        for (ticker, quote) in quotes {
                            self.quote_cache.set(ticker, quote, self.quote_ttl);
                        }
                        break;
                    }
                    Err(_) => reg.breaker.record_failure(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        id: &'static str,
        priority: i32,
        market: Market,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl DataFetcher for FlakySource {
        fn id(&self) -> &'static str {
            self.id
        }
        fn base_priority(&self) -> i32 {
            self.priority
        }
        fn supports(&self, market: Market) -> bool {
            market == self.market
        }
        async fn get_history(&self, _ticker: &Ticker, _days: u32) -> Result<Vec<Candle>, FetchError> {
            unimplemented!()
        }
        async fn get_realtime(&self, ticker: &Ticker) -> Result<Quote, FetchError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(FetchError::Transient("boom".into()));
            }
            Ok(Quote {
                ticker: ticker.as_str().to_string(),
                price: 1.0,
                change_pct: 0.0,
                timestamp: Utc::now(),
                source_id: self.id.to_string(),
            })
        }
        async fn get_name(&self, _ticker: &Ticker) -> Result<String, FetchError> {
            Ok("Test Co".into())
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_source_on_failure() {
        let primary = Arc::new(FlakySource {
            id: "primary",
            priority: 1,
            market: Market::UnitedStates,
            fail_times: AtomicU32::new(99),
        });
        let secondary = Arc::new(FlakySource {
            id: "secondary",
            priority: 2,
            market: Market::UnitedStates,
            fail_times: AtomicU32::new(0),
        });
        let pool = FetcherPool::new(
            vec![primary, secondary],
            &HashMap::new(),
            None,
            3,
            Duration::from_secs(600),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let quote = pool.get_realtime(&Ticker::canonical("AAPL")).await.unwrap();
        assert_eq!(quote.source_id, "secondary");
    }

    #[tokio::test]
    async fn market_not_supported_short_circuits_without_attempt() {
        let pool = FetcherPool::new(vec![], &HashMap::new(), None, 3, Duration::from_secs(600), Duration::from_secs(60), Duration::from_secs(60));
        let err = pool.get_realtime(&Ticker::canonical("9!!!")).await.unwrap_err();
        assert!(matches!(err, PoolError::MarketNotSupported));
    }

    #[tokio::test]
    async fn all_sources_failed_is_not_a_panic() {
        let pool = FetcherPool::new(vec![], &HashMap::new(), None, 3, Duration::from_secs(600), Duration::from_secs(60), Duration::from_secs(60));
        let err = pool.get_history(&Ticker::canonical("AAPL"), 30).await.unwrap_err();
        assert!(matches!(err, PoolError::AllSourcesFailed));
    }

    #[tokio::test]
    async fn us_dedicated_source_wins_regardless_of_priority() {
        let low_priority_dedicated = Arc::new(FlakySource {
            id: "us_quote",
            priority: 100,
            market: Market::UnitedStates,
            fail_times: AtomicU32::new(0),
        });
        let high_priority_generic = Arc::new(FlakySource {
            id: "generic",
            priority: 1,
            market: Market::UnitedStates,
            fail_times: AtomicU32::new(0),
        });
        let pool = FetcherPool::new(
            vec![high_priority_generic, low_priority_dedicated],
            &HashMap::new(),
            Some("us_quote"),
            3,
            Duration::from_secs(600),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let quote = pool.get_realtime(&Ticker::canonical("SPX")).await.unwrap();
        assert_eq!(quote.source_id, "us_quote");
    }

    #[tokio::test]
    async fn cache_hit_issues_no_second_call() {
        let counting = Arc::new(FlakySource {
            id: "primary",
            priority: 1,
            market: Market::UnitedStates,
            fail_times: AtomicU32::new(0),
        });
        let pool = FetcherPool::new(
            vec![counting],
            &HashMap::new(),
            None,
            3,
            Duration::from_secs(600),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let ticker = Ticker::canonical("AAPL");
        let first = pool.get_realtime(&ticker).await.unwrap();
        let second = pool.get_realtime(&ticker).await.unwrap();
        assert_eq!(first.timestamp, second.timestamp);
    }
}
