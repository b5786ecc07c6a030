//! Concrete tools the Agent Executor registers against the real subsystems:
//! `get_daily_history`, `get_realtime_quote`, `analyze_trend`, and
//! `search_stock_news`. Each tool is a thin JSON-args-in, JSON-string-out
//! adapter over the fetcher pool, news service, and indicator engine, in the
//! same shape the fetcher adapters use for their own wire parsing.

use super::tools::{Tool, ToolError};
use crate::fetcher::FetcherPool;
use crate::indicators;
use crate::models::Ticker;
use crate::news::NewsService;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

fn ticker_arg(args: &Value) -> Result<Ticker, ToolError> {
    let raw = args
        .get("ticker")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments("missing \"ticker\"".into()))?;
    Ok(Ticker::canonical(raw))
}

pub struct GetDailyHistoryTool {
    pub fetcher: Arc<FetcherPool>,
}

#[async_trait]
impl Tool for GetDailyHistoryTool {
    fn name(&self) -> &str {
        "fetcher.get_daily_history"
    }
    fn description(&self) -> &str {
        "Fetch daily OHLCV candles for a ticker over a lookback window."
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string"},
                "days": {"type": "integer", "default": 60}
            },
            "required": ["ticker"]
        })
    }
    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let ticker = ticker_arg(&args)?;
        let days = args.get("days").and_then(Value::as_u64).unwrap_or(60) as u32;
        let candles = self
            .fetcher
            .get_history(&ticker, days)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{e:?}")))?;
        serde_json::to_string(&candles).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}

pub struct GetRealtimeQuoteTool {
    pub fetcher: Arc<FetcherPool>,
}

#[async_trait]
impl Tool for GetRealtimeQuoteTool {
    fn name(&self) -> &str {
        "fetcher.get_realtime_quote"
    }
    fn description(&self) -> &str {
        "Fetch the current realtime quote for a ticker."
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"ticker": {"type": "string"}},
            "required": ["ticker"]
        })
    }
    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let ticker = ticker_arg(&args)?;
        let quote = self
            .fetcher
            .get_realtime(&ticker)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{e:?}")))?;
        serde_json::to_string(&quote).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}

/// Runs the same pure indicator math the Pipeline uses (C6), over a
/// freshly-fetched history, without the live-quote virtual candle (the
/// agent asks separately for a realtime quote when it wants that).
pub struct AnalyzeTrendTool {
    pub fetcher: Arc<FetcherPool>,
}

#[async_trait]
impl Tool for AnalyzeTrendTool {
    fn name(&self) -> &str {
        "indicators.analyze_trend"
    }
    fn description(&self) -> &str {
        "Compute MA/MACD/RSI/bias and bullish-alignment for a ticker's recent history."
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string"},
                "days": {"type": "integer", "default": 60}
            },
            "required": ["ticker"]
        })
    }
    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let ticker = ticker_arg(&args)?;
        let days = args.get("days").and_then(Value::as_u64).unwrap_or(60) as u32;
        let candles = self
            .fetcher
            .get_history(&ticker, days)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{e:?}")))?;
        let snapshot = indicators::compute_snapshot(&candles, None, false);
        serde_json::to_string(&snapshot).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}

pub struct SearchStockNewsTool {
    pub news: Arc<NewsService>,
}

#[async_trait]
impl Tool for SearchStockNewsTool {
    fn name(&self) -> &str {
        "news.search_stock_news"
    }
    fn description(&self) -> &str {
        "Search recent news for a ticker and company name."
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string"},
                "company_name": {"type": "string"}
            },
            "required": ["ticker", "company_name"]
        })
    }
    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let ticker = ticker_arg(&args)?;
        let company_name = args
            .get("company_name")
            .and_then(Value::as_str)
            .unwrap_or_else(|| ticker.as_str());
        let intel = self.news.gather(&ticker, company_name).await;
        serde_json::to_string(&intel).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::sources::UsQuoteSource;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn tool_names_strip_to_the_agent_facing_short_name() {
        let fetcher = Arc::new(FetcherPool::new(
            vec![Arc::new(UsQuoteSource::new(reqwest::Client::new(), "http://localhost", 1))],
            &HashMap::new(),
            None,
            3,
            Duration::from_secs(600),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let tool = GetDailyHistoryTool { fetcher };
        assert_eq!(tool.name().rsplit('.').next().unwrap(), "get_daily_history");
    }

    #[tokio::test]
    async fn missing_ticker_argument_is_rejected() {
        let fetcher = Arc::new(FetcherPool::new(vec![], &HashMap::new(), None, 3, Duration::from_secs(600), Duration::from_secs(60), Duration::from_secs(60)));
        let tool = GetRealtimeQuoteTool { fetcher };
        let err = tool.call(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
