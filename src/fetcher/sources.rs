//! Concrete vendor adapters implementing `DataFetcher`.
//!
//! Vendor client libraries themselves are out of scope; these adapters are
//! the thin translation layer from one HTTP API's JSON shape to the pool's
//! `Candle`/`Quote` types, built on a plain `reqwest::Client` + `.json::<T>()`
//! call per request.

use super::{DataFetcher, FetchError};
use crate::models::{Candle, Market, Quote, Ticker};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

/// A-share/HK source backed by a Tushare-style token API.
pub struct TushareSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
    priority: i32,
}

impl TushareSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>, priority: i32) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            priority,
        }
    }
}

#[derive(Deserialize)]
struct TushareCandleRow {
    trade_date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    vol: f64,
    amount: Option<f64>,
}

#[async_trait]
impl DataFetcher for TushareSource {
    fn id(&self) -> &'static str {
        "tushare"
    }
    fn base_priority(&self) -> i32 {
        self.priority
    }
    fn supports(&self, market: Market) -> bool {
        matches!(market, Market::AShare | Market::HongKong)
    }

    async fn get_history(&self, ticker: &Ticker, days: u32) -> Result<Vec<Candle>, FetchError> {
        if !self.supports(ticker.market().unwrap_or(Market::UnitedStates)) {
            return Err(FetchError::MarketNotSupported);
        }
        let url = format!("{}/daily", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("ts_code", ticker.as_str()), ("token", self.token.as_str())])
            .query(&[("limit", days)])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Transient(format!("http {}", resp.status())));
        }
        let rows: Vec<TushareCandleRow> = resp
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let date = chrono::NaiveDate::parse_from_str(&row.trade_date, "%Y%m%d")
                .map_err(|e| FetchError::Malformed(e.to_string()))?;
            candles.push(Candle {
                date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.vol,
                amount: row.amount,
            });
        }
        candles.sort_by_key(|c| c.date);
        candles.dedup_by_key(|c| c.date);
        Ok(candles)
    }

    async fn get_realtime(&self, ticker: &Ticker) -> Result<Quote, FetchError> {
        #[derive(Deserialize)]
        struct TushareQuote {
            price: f64,
            change_pct: f64,
        }
        let url = format!("{}/realtime", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("ts_code", ticker.as_str()), ("token", self.token.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Transient(format!("http {}", resp.status())));
        }
        let body: TushareQuote = resp.json().await.map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(Quote {
            ticker: ticker.as_str().to_string(),
            price: body.price,
            change_pct: body.change_pct,
            timestamp: Utc::now(),
            source_id: self.id().to_string(),
        })
    }

    async fn get_name(&self, ticker: &Ticker) -> Result<String, FetchError> {
        #[derive(Deserialize)]
        struct TushareName {
            name: String,
        }
        let url = format!("{}/stock_basic", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("ts_code", ticker.as_str()), ("token", self.token.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        let body: TushareName = resp.json().await.map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(body.name)
    }
}

/// The dedicated US-quote source that history/realtime for US tickers must
/// route to regardless of global priority.
pub struct UsQuoteSource {
    client: reqwest::Client,
    base_url: String,
    priority: i32,
}

impl UsQuoteSource {
    pub const ID: &'static str = "us_quote";

    pub fn new(client: reqwest::Client, base_url: impl Into<String>, priority: i32) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            priority,
        }
    }

    /// Map a user-facing index alias through the static table before dispatch.
    fn dispatch_symbol(ticker: &Ticker) -> String {
        ticker.us_index_alias().map(str::to_string).unwrap_or_else(|| ticker.as_str().to_string())
    }
}

#[derive(Deserialize)]
struct UsCandleRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Deserialize)]
struct UsQuoteRow {
    price: f64,
    change_pct: f64,
}

#[async_trait]
impl DataFetcher for UsQuoteSource {
    fn id(&self) -> &'static str {
        Self::ID
    }
    fn base_priority(&self) -> i32 {
        self.priority
    }
    fn supports(&self, market: Market) -> bool {
        market == Market::UnitedStates
    }

    async fn get_history(&self, ticker: &Ticker, days: u32) -> Result<Vec<Candle>, FetchError> {
        let symbol = Self::dispatch_symbol(ticker);
        debug!(symbol = %symbol, "routing US history to dedicated source");
        let url = format!("{}/v1/history/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .query(&[("days", days)])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Transient(format!("http {}", resp.status())));
        }
        let rows: Vec<UsCandleRow> = resp.json().await.map_err(|e| FetchError::Malformed(e.to_string()))?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let date = chrono::NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
                .map_err(|e| FetchError::Malformed(e.to_string()))?;
            candles.push(Candle {
                date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                amount: None,
            });
        }
        candles.sort_by_key(|c| c.date);
        candles.dedup_by_key(|c| c.date);
        Ok(candles)
    }

    async fn get_realtime(&self, ticker: &Ticker) -> Result<Quote, FetchError> {
        let symbol = Self::dispatch_symbol(ticker);
        let url = format!("{}/v1/quote/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Transient(format!("http {}", resp.status())));
        }
        let body: UsQuoteRow = resp.json().await.map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(Quote {
            ticker: ticker.as_str().to_string(),
            price: body.price,
            change_pct: body.change_pct,
            timestamp: Utc::now(),
            source_id: self.id().to_string(),
        })
    }

    async fn get_name(&self, ticker: &Ticker) -> Result<String, FetchError> {
        let symbol = Self::dispatch_symbol(ticker);
        let url = format!("{}/v1/profile/{}", self.base_url, symbol);
        #[derive(Deserialize)]
        struct Profile {
            name: String,
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        let body: Profile = resp.json().await.map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(body.name)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn get_realtime_batch(
        &self,
        tickers: &[Ticker],
    ) -> Result<std::collections::HashMap<String, Quote>, FetchError> {
        let symbols: Vec<String> = tickers.iter().map(Self::dispatch_symbol).collect();
        let url = format!("{}/v1/quotes", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        let rows: Vec<UsQuoteRow> = resp.json().await.map_err(|e| FetchError::Malformed(e.to_string()))?;
        let mut out = std::collections::HashMap::new();
        for (ticker, row) in tickers.iter().zip(rows) {
            out.insert(
                ticker.as_str().to_string(),
                Quote {
                    ticker: ticker.as_str().to_string(),
                    price: row.price,
                    change_pct: row.change_pct,
                    timestamp: Utc::now(),
                    source_id: self.id().to_string(),
                },
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_symbol_maps_index_aliases() {
        assert_eq!(UsQuoteSource::dispatch_symbol(&Ticker::canonical("SPX")), "^GSPC");
        assert_eq!(UsQuoteSource::dispatch_symbol(&Ticker::canonical("AAPL")), "AAPL");
    }
}
