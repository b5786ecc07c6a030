//! Shared domain types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Market a ticker belongs to, inferred purely from its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    AShare,
    HongKong,
    UnitedStates,
}

/// Region filter used by the market-review scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegion {
    China,
    UnitedStates,
    Both,
}

impl MarketRegion {
    pub fn includes(&self, market: Market) -> bool {
        match self {
            MarketRegion::Both => true,
            MarketRegion::China => matches!(market, Market::AShare | Market::HongKong),
            MarketRegion::UnitedStates => matches!(market, Market::UnitedStates),
        }
    }
}

/// A canonical uppercase ticker with its inferred market.
///
/// Invariant: `Ticker::canonical(Ticker::canonical(x).as_str()) == Ticker::canonical(x)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    /// Normalize a raw user-supplied symbol into canonical form.
    pub fn canonical(raw: &str) -> Self {
        let trimmed = raw.trim().to_uppercase();
        let trimmed = trimmed.strip_prefix("HK:").unwrap_or(&trimmed).to_string();
        Ticker(trimmed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Infer the market from the ticker's shape.
    pub fn market(&self) -> Option<Market> {
        let s = &self.0;
        if s.len() == 6 && s.chars().all(|c| c.is_ascii_digit()) {
            return Some(Market::AShare);
        }
        if s.len() == 5 && s.chars().all(|c| c.is_ascii_digit()) {
            return Some(Market::HongKong);
        }
        if let Some(rest) = s.strip_prefix("HK") {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return Some(Market::HongKong);
            }
        }
        let letters_and_one_dot = {
            let dots = s.chars().filter(|c| *c == '.').count();
            let body: String = s.chars().filter(|c| *c != '.').collect();
            dots <= 1
                && !body.is_empty()
                && body.len() <= 6
                && body.chars().all(|c| c.is_ascii_alphabetic())
        };
        if letters_and_one_dot {
            return Some(Market::UnitedStates);
        }
        None
    }

    /// Map a US index alias through the static table before dispatch.
    pub fn us_index_alias(&self) -> Option<&'static str> {
        match self.0.as_str() {
            "SPX" => Some("^GSPC"),
            "NDX" => Some("^NDX"),
            "DJI" => Some("^DJI"),
            "VIX" => Some("^VIX"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One OHLCV bar. A series is strictly increasing by date with no duplicates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: Option<f64>,
}

/// A realtime snapshot, cached under the ticker with a short TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub change_pct: f64,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
}

/// Derived technical indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub rsi14: Option<f64>,
    pub bias_pct: Option<f64>,
    pub bullish_alignment: bool,
    pub used_virtual_candle: bool,
}

/// A single ranked news item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
    pub fingerprint: String,
    pub relevance: f64,
}

impl NewsItem {
    /// Stable fingerprint of normalized title+url.
    pub fn fingerprint_of(title: &str, url: &str) -> String {
        let normalized_title = title.trim().to_lowercase();
        let normalized_url = url.trim().trim_end_matches('/').to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized_title.as_bytes());
        hasher.update(b"|");
        hasher.update(normalized_url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Ranked news bundle returned by the News Service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewsIntel {
    pub items: Vec<NewsItem>,
    pub search_fallback: bool,
}

/// The assembled input given to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub ticker: String,
    pub name: String,
    pub market: Market,
    pub quote: Option<Quote>,
    pub candles: Vec<Candle>,
    pub technicals: Option<TechnicalSnapshot>,
    pub news: NewsIntel,
    pub previous_report_context: Option<String>,
    pub truncated_fields: Vec<String>,
}

/// `AnalysisReport.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub id: Option<i64>,
    pub query_id: String,
    pub ticker: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub current_price: f64,
    pub change_pct: f64,
    pub report_type: String,
    pub engine_version: String,
}

/// `AnalysisReport.summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub sentiment_score: f64,
    pub analysis_summary: String,
    pub operation_advice: String,
    pub trend_prediction: String,
    pub risk_alerts: Vec<String>,
}

/// `AnalysisReport.strategy`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportStrategy {
    pub ideal_buy: Option<f64>,
    pub secondary_buy: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// `AnalysisReport.details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDetails {
    pub raw_result: String,
    pub context_snapshot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub meta: ReportMeta,
    pub summary: ReportSummary,
    pub strategy: ReportStrategy,
    pub details: ReportDetails,
}

impl AnalysisReport {
    /// Record a strategy-band violation without failing the report.
    pub fn flag_strategy_violations(&mut self) {
        let price = self.meta.current_price;
        if let Some(sl) = self.strategy.stop_loss {
            if sl >= price {
                self.summary
                    .risk_alerts
                    .push(format!("stop_loss {sl} is not below current price {price}"));
            }
        }
        if let Some(tp) = self.strategy.take_profit {
            if tp <= price {
                self.summary
                    .risk_alerts
                    .push(format!("take_profit {tp} is not above current price {price}"));
            }
        }
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub ticker: String,
    pub report_type: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A role in a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub role: ConversationRole,
    pub content: String,
    pub tool_calls: Option<serde_json::Value>,
    pub reasoning_blob: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_idempotent() {
        for raw in ["600519", "aapl", " hk:00700 ", "brk.b", "SPX"] {
            let once = Ticker::canonical(raw);
            let twice = Ticker::canonical(once.as_str());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn market_inference() {
        assert_eq!(Ticker::canonical("600519").market(), Some(Market::AShare));
        assert_eq!(Ticker::canonical("00700").market(), Some(Market::HongKong));
        assert_eq!(Ticker::canonical("hk00700").market(), Some(Market::HongKong));
        assert_eq!(Ticker::canonical("aapl").market(), Some(Market::UnitedStates));
        assert_eq!(Ticker::canonical("brk.b").market(), Some(Market::UnitedStates));
    }

    #[test]
    fn us_index_alias_maps_spx() {
        let t = Ticker::canonical("spx");
        assert_eq!(t.us_index_alias(), Some("^GSPC"));
    }

    #[test]
    fn fingerprint_is_stable_across_casing_and_trailing_slash() {
        let a = NewsItem::fingerprint_of("Hello World", "https://example.com/a/");
        let b = NewsItem::fingerprint_of("hello world", "https://example.com/a");
        assert_eq!(a, b);
    }

    #[test]
    fn strategy_violation_is_recorded_not_rejected() {
        let mut report = AnalysisReport {
            meta: ReportMeta {
                id: None,
                query_id: "q1".into(),
                ticker: "600519".into(),
                name: "Kweichow Moutai".into(),
                created_at: Utc::now(),
                current_price: 100.0,
                change_pct: 0.0,
                report_type: "standard".into(),
                engine_version: "test".into(),
            },
            summary: ReportSummary {
                sentiment_score: 50.0,
                analysis_summary: String::new(),
                operation_advice: String::new(),
                trend_prediction: String::new(),
                risk_alerts: vec![],
            },
            strategy: ReportStrategy {
                ideal_buy: None,
                secondary_buy: None,
                stop_loss: Some(110.0),
                take_profit: Some(90.0),
            },
            details: ReportDetails {
                raw_result: String::new(),
                context_snapshot: String::new(),
            },
        };
        report.flag_strategy_violations();
        assert_eq!(report.summary.risk_alerts.len(), 2);
    }
}
