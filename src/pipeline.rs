//! Analysis Pipeline (C8)
//! Mission: gate -> fan-out fetch -> technicals -> assemble -> generate ->
//! parse -> backfill -> persist -> publish -> dispatch, for one ticker.
//! Distinguishes fatal failures (abort the task) from non-fatal ones
//! (degrade and continue).

use crate::assembler::{self, AssemblerInput};
use crate::calendar::{self, CalendarGate, GateDecision};
use crate::error::{AppError, AppResult};
use crate::fetcher::{FetcherPool, PoolError};
use crate::indicators;
use crate::llm::{ChatMessage, ChatRequest, LlmRouter};
use crate::models::{AnalysisReport, NewsIntel, ReportDetails, ReportMeta, ReportStrategy, ReportSummary, Ticker};
use crate::news::NewsService;
use crate::notify::NotificationDispatcher;
use crate::persistence::Store;
use crate::queue::TaskQueue;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Pipeline {
    pub fetcher: Arc<FetcherPool>,
    pub news: Arc<NewsService>,
    pub llm: Arc<LlmRouter>,
    pub store: Arc<Store>,
    pub gate: Arc<CalendarGate>,
    pub notifier: Option<Arc<NotificationDispatcher>>,
    pub engine_version: String,
    pub enable_realtime_technical_indicators: bool,
    pub history_days: u32,
    pub bias_threshold: f64,
    pub trading_day_check_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct LlmReportPayload {
    sentiment_score: f64,
    analysis_summary: String,
    operation_advice: String,
    trend_prediction: String,
    #[serde(default)]
    risk_alerts: Vec<String>,
    #[serde(default)]
    ideal_buy: Option<f64>,
    #[serde(default)]
    secondary_buy: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
}

impl Pipeline {
    /// Run the full pipeline for one ticker, optionally reporting progress
    /// through `task_queue`/`task_id` and dispatching a notification on
    /// success.
    pub async fn run_for_ticker(
        &self,
        ticker: &Ticker,
        report_type: &str,
        task_queue: Option<(&TaskQueue, &str)>,
        notify_channel: Option<&str>,
        force_run: bool,
    ) -> AppResult<AnalysisReport> {
        let market = ticker.market().ok_or(AppError::MarketUnsupported)?;

        if self.trading_day_check_enabled
            && !force_run
            && self.gate.decide(calendar::local_today(market), market) == GateDecision::Skip
        {
            return Err(AppError::BadRequest("market closed for this ticker's calendar".into()));
        }

        let report_progress = |pct: f64, msg: &str| {
            if let Some((queue, task_id)) = task_queue {
                queue.report_progress(task_id, pct, msg);
            }
        };

        report_progress(0.1, "fetching market data");
        let quote = self.fetcher.get_realtime(ticker).await.ok();
        let candles = match self.fetcher.get_history(ticker, self.history_days).await {
            Ok(c) => c,
            Err(PoolError::MarketNotSupported) => return Err(AppError::MarketUnsupported),
            Err(PoolError::AllSourcesFailed) => return Err(AppError::SourceExhausted),
        };
        let name = self.fetcher.get_name(ticker).await.unwrap_or_else(|_| ticker.as_str().to_string());

        report_progress(0.3, "computing technical indicators");
        let mut bias_alert = None;
        let technicals = if self.enable_realtime_technical_indicators {
            let snapshot = indicators::compute_snapshot(&candles, quote.as_ref(), true);
            if let Some(bias) = snapshot.bias_pct {
                let band = indicators::effective_bias_band(self.bias_threshold, &candles, &snapshot);
                if bias.abs() > band {
                    bias_alert = Some(format!("price is {bias:.1}% from its 20-day average, beyond the {band:.1}% acceptance band"));
                }
            }
            Some(snapshot)
        } else {
            None
        };

        report_progress(0.4, "gathering news");
        let news = self.news.gather(ticker, &name).await;
        if news.search_fallback {
            warn!(ticker = ticker.as_str(), "news fanout fell back, proceeding without fresh news");
        }

        let previous_report_context = self
            .store
            .latest_report(ticker.as_str())
            .ok()
            .flatten()
            .map(|record| record.report.summary.analysis_summary);

        report_progress(0.5, "assembling context");
        let bundle = assembler::assemble(AssemblerInput {
            ticker,
            name: name.clone(),
            market,
            quote: quote.clone(),
            candles: candles.clone(),
            technicals: technicals.clone(),
            news: news.clone(),
            previous_report_context,
        });

        report_progress(0.6, "generating report");
        let response = self
            .llm
            .complete(&ChatRequest {
                messages: vec![
                    ChatMessage {
                        role: "system".into(),
                        content: SYSTEM_PROMPT.into(),
                    },
                    ChatMessage {
                        role: "user".into(),
                        content: serde_json::to_string(&bundle)?,
                    },
                ],
                tools: vec![],
                image_urls: vec![],
            })
            .await
            .map_err(|e| AppError::LlmInvalidResponse(e.to_string()))?;

        report_progress(0.8, "parsing report");
        let payload = parse_llm_payload(&response.content)?;

        let current_price = quote.as_ref().map(|q| q.price).unwrap_or_else(|| candles.last().map(|c| c.close).unwrap_or(0.0));
        let change_pct = quote.as_ref().map(|q| q.change_pct).unwrap_or(0.0);

        let mut report = AnalysisReport {
            meta: ReportMeta {
                id: None,
                query_id: uuid::Uuid::new_v4().to_string(),
                ticker: ticker.as_str().to_string(),
                name,
                created_at: Utc::now(),
                current_price,
                change_pct,
                report_type: report_type.to_string(),
                engine_version: self.engine_version.clone(),
            },
            summary: ReportSummary {
                sentiment_score: payload.sentiment_score,
                analysis_summary: payload.analysis_summary,
                operation_advice: payload.operation_advice,
                trend_prediction: payload.trend_prediction,
                risk_alerts: payload.risk_alerts,
            },
            strategy: ReportStrategy {
                ideal_buy: payload.ideal_buy,
                secondary_buy: payload.secondary_buy,
                stop_loss: payload.stop_loss,
                take_profit: payload.take_profit,
            },
            details: ReportDetails {
                raw_result: response.content,
                context_snapshot: serde_json::to_string(&bundle)?,
            },
        };
        if let Some(alert) = bias_alert {
            report.summary.risk_alerts.push(alert);
        }
        report.flag_strategy_violations();

        report_progress(0.9, "persisting report");
        let record_id = self.store.save_report(&report, &news)?;
        report.meta.id = Some(record_id);

        if let Some(channel) = notify_channel {
            if let Some(notifier) = &self.notifier {
                notifier.dispatch(channel, &report).await;
            }
        }

        if let Some((queue, task_id)) = task_queue {
            queue.mark_completed(task_id);
        }
        info!(ticker = ticker.as_str(), record_id, "analysis pipeline completed");
        Ok(report)
    }
}

const SYSTEM_PROMPT: &str = "You are an equity research assistant. Given the evidence bundle JSON, \
respond with a single JSON object: sentiment_score (0-100), analysis_summary, operation_advice, \
trend_prediction, risk_alerts (array of strings), and optionally ideal_buy, secondary_buy, \
stop_loss, take_profit as numbers.";

/// Strip an optional ```json fence before parsing.
fn parse_llm_payload(content: &str) -> AppResult<LlmReportPayload> {
    let trimmed = content.trim();
    let json_text = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(json_text).map_err(|e| AppError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_payload() {
        let content = "```json\n{\"sentiment_score\":70,\"analysis_summary\":\"ok\",\"operation_advice\":\"hold\",\"trend_prediction\":\"flat\"}\n```";
        let payload = parse_llm_payload(content).unwrap();
        assert_eq!(payload.sentiment_score, 70.0);
    }

    #[test]
    fn parses_bare_json_payload() {
        let content = "{\"sentiment_score\":40,\"analysis_summary\":\"weak\",\"operation_advice\":\"sell\",\"trend_prediction\":\"down\",\"risk_alerts\":[\"x\"]}";
        let payload = parse_llm_payload(content).unwrap();
        assert_eq!(payload.risk_alerts, vec!["x".to_string()]);
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        let err = parse_llm_payload("not json").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }
}
