//! Notification Dispatcher (C13)
//! Mission: route completed reports to the right recipient group and chunk
//! oversized messages to fit a channel's size limit.

mod channel;
mod chunk;

pub use channel::{NotificationChannel, NotificationError, WebhookChannel};
pub use chunk::chunk_message;

use crate::models::AnalysisReport;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Maximum body size per message before chunking kicks in: configurable,
/// defaults to 4096 bytes.
const DEFAULT_CHUNK_LIMIT: usize = 4096;

pub struct NotificationDispatcher {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    /// stock ticker -> group name.
    stock_groups: HashMap<String, Vec<String>>,
    /// group name -> recipients.
    email_groups: HashMap<String, Vec<String>>,
    chunk_limit: usize,
}

impl NotificationDispatcher {
    pub fn new(
        channels: HashMap<String, Arc<dyn NotificationChannel>>,
        stock_groups: HashMap<String, Vec<String>>,
        email_groups: HashMap<String, Vec<String>>,
        chunk_limit: Option<usize>,
    ) -> Self {
        Self {
            channels,
            stock_groups,
            email_groups,
            chunk_limit: chunk_limit.unwrap_or(DEFAULT_CHUNK_LIMIT),
        }
    }

    /// Groups a ticker belongs to, by scanning the configured stock-group
    /// membership lists.
    fn groups_for_ticker(&self, ticker: &str) -> Vec<&str> {
        self.stock_groups
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == ticker))
            .map(|(group, _)| group.as_str())
            .collect()
    }

    /// Dispatch a completed report to every recipient of every group the
    /// report's ticker belongs to, chunking the body if needed. Failures on
    /// individual recipients are logged and do not abort the batch.
    pub async fn dispatch(&self, channel_id: &str, report: &AnalysisReport) {
        let Some(channel) = self.channels.get(channel_id) else {
            error!(channel_id, "unknown notification channel");
            return;
        };
        let groups = self.groups_for_ticker(&report.meta.ticker);
        if groups.is_empty() {
            return;
        }
        let subject = format!("{} ({}) — {}", report.meta.name, report.meta.ticker, report.meta.report_type);
        let body = render_body(report);
        let chunks = chunk_message(&body, self.chunk_limit);

        for group in groups {
            let Some(recipients) = self.email_groups.get(group) else {
                continue;
            };
            for recipient in recipients {
                for (i, chunk) in chunks.iter().enumerate() {
                    let subject = if chunks.len() > 1 {
                        format!("{subject} ({}/{})", i + 1, chunks.len())
                    } else {
                        subject.clone()
                    };
                    if let Err(e) = channel.send(recipient, &subject, chunk).await {
                        error!(recipient, error = %e, "notification send failed");
                    } else {
                        info!(recipient, group, "notification sent");
                    }
                }
            }
        }
    }
}

fn render_body(report: &AnalysisReport) -> String {
    format!(
        "Sentiment: {:.1}\nAdvice: {}\nTrend: {}\n\n{}\n\nRisk alerts:\n{}",
        report.summary.sentiment_score,
        report.summary.operation_advice,
        report.summary.trend_prediction,
        report.summary.analysis_summary,
        report.summary.risk_alerts.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportDetails, ReportMeta, ReportStrategy, ReportSummary};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, recipient: &str, _subject: &str, body: &str) -> Result<(), NotificationError> {
            self.sent.lock().push((recipient.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn sample_report() -> AnalysisReport {
        AnalysisReport {
            meta: ReportMeta {
                id: None,
                query_id: "q1".into(),
                ticker: "AAPL".into(),
                name: "Apple".into(),
                created_at: Utc::now(),
                current_price: 200.0,
                change_pct: 1.0,
                report_type: "standard".into(),
                engine_version: "test".into(),
            },
            summary: ReportSummary {
                sentiment_score: 70.0,
                analysis_summary: "bullish".into(),
                operation_advice: "buy".into(),
                trend_prediction: "up".into(),
                risk_alerts: vec![],
            },
            strategy: ReportStrategy::default(),
            details: ReportDetails {
                raw_result: String::new(),
                context_snapshot: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn dispatches_to_every_group_recipient() {
        let channel = Arc::new(RecordingChannel { sent: Mutex::new(vec![]) });
        let mut channels: HashMap<String, Arc<dyn NotificationChannel>> = HashMap::new();
        channels.insert("email".into(), channel.clone());
        let mut stock_groups = HashMap::new();
        stock_groups.insert("tech".to_string(), vec!["AAPL".to_string()]);
        let mut email_groups = HashMap::new();
        email_groups.insert("tech".to_string(), vec!["a@example.com".to_string(), "b@example.com".to_string()]);

        let dispatcher = NotificationDispatcher::new(channels, stock_groups, email_groups, None);
        dispatcher.dispatch("email", &sample_report()).await;
        assert_eq!(channel.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn ticker_outside_any_group_is_skipped() {
        let channel = Arc::new(RecordingChannel { sent: Mutex::new(vec![]) });
        let mut channels: HashMap<String, Arc<dyn NotificationChannel>> = HashMap::new();
        channels.insert("email".into(), channel.clone());
        let dispatcher = NotificationDispatcher::new(channels, HashMap::new(), HashMap::new(), None);
        dispatcher.dispatch("email", &sample_report()).await;
        assert!(channel.sent.lock().is_empty());
    }
}
