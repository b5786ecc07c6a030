//! Persistence (C11)
//! Mission: durable storage for analysis history, news intel, and
//! conversation turns, using a WAL-mode rusqlite schema constant plus
//! per-call `Connection::open`.

mod schema;

use crate::error::{AppError, AppResult};
use crate::models::{
    AnalysisReport, ConversationRole, ConversationTurn, NewsIntel, NewsItem, ReportDetails,
    ReportMeta, ReportStrategy, ReportSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;

/// One persisted analysis record, as returned by history listing/lookup.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub report: AnalysisReport,
}

#[derive(Clone)]
pub struct Store {
    path: Arc<str>,
}

impl Store {
    /// Open (creating if absent) and apply the WAL-mode schema.
    pub fn open(path: &str) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self { path: Arc::from(path) })
    }

    fn conn(&self) -> AppResult<Connection> {
        let conn = Connection::open(self.path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    /// Persist a completed report plus its news bundle in one scoped
    /// transaction.
    pub fn save_report(&self, report: &AnalysisReport, news: &NewsIntel) -> AppResult<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO analysis_history
                (query_id, ticker, name, created_at, current_price, change_pct, report_type,
                 engine_version, sentiment_score, analysis_summary, operation_advice,
                 trend_prediction, risk_alerts, ideal_buy, secondary_buy, stop_loss, take_profit,
                 raw_result, context_snapshot)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                report.meta.query_id,
                report.meta.ticker,
                report.meta.name,
                report.meta.created_at.to_rfc3339(),
                report.meta.current_price,
                report.meta.change_pct,
                report.meta.report_type,
                report.meta.engine_version,
                report.summary.sentiment_score,
                report.summary.analysis_summary,
                report.summary.operation_advice,
                report.summary.trend_prediction,
                serde_json::to_string(&report.summary.risk_alerts)?,
                report.strategy.ideal_buy,
                report.strategy.secondary_buy,
                report.strategy.stop_loss,
                report.strategy.take_profit,
                report.details.raw_result,
                report.details.context_snapshot,
            ],
        )?;
        let record_id = tx.last_insert_rowid();

        for item in &news.items {
            tx.execute(
                "INSERT INTO news_intel
                    (record_id, title, snippet, url, published_at, source, fingerprint, relevance)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    record_id,
                    item.title,
                    item.snippet,
                    item.url,
                    item.published_at.to_rfc3339(),
                    item.source,
                    item.fingerprint,
                    item.relevance,
                ],
            )?;
        }
        tx.commit()?;
        Ok(record_id)
    }

    pub fn get_report(&self, record_id: i64) -> AppResult<HistoryRecord> {
        let conn = self.conn()?;
        let row = conn.query_row(
            "SELECT id, query_id, ticker, name, created_at, current_price, change_pct, report_type,
                    engine_version, sentiment_score, analysis_summary, operation_advice,
                    trend_prediction, risk_alerts, ideal_buy, secondary_buy, stop_loss, take_profit,
                    raw_result, context_snapshot
             FROM analysis_history WHERE id = ?1",
            params![record_id],
            row_to_report,
        );
        match row {
            Ok(report) => Ok(HistoryRecord { report }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent reports for a ticker, newest first.
    pub fn list_reports(&self, ticker: &str, limit: u32) -> AppResult<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, query_id, ticker, name, created_at, current_price, change_pct, report_type,
                    engine_version, sentiment_score, analysis_summary, operation_advice,
                    trend_prediction, risk_alerts, ideal_buy, secondary_buy, stop_loss, take_profit,
                    raw_result, context_snapshot
             FROM analysis_history WHERE ticker = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![ticker, limit], row_to_report)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(HistoryRecord { report: row? });
        }
        Ok(out)
    }

    /// Latest report for a ticker, used as `previous_report_context`.
    pub fn latest_report(&self, ticker: &str) -> AppResult<Option<HistoryRecord>> {
        Ok(self.list_reports(ticker, 1)?.into_iter().next())
    }

    pub fn get_news_for_report(&self, record_id: i64) -> AppResult<Vec<NewsItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT title, snippet, url, published_at, source, fingerprint, relevance
             FROM news_intel WHERE record_id = ?1 ORDER BY relevance DESC",
        )?;
        let rows = stmt.query_map(params![record_id], |r| {
            let published_at: String = r.get(3)?;
            Ok(NewsItem {
                title: r.get(0)?,
                snippet: r.get(1)?,
                url: r.get(2)?,
                published_at: DateTime::parse_from_rfc3339(&published_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                source: r.get(4)?,
                fingerprint: r.get(5)?,
                relevance: r.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn save_conversation_turn(&self, turn: &ConversationTurn) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO conversation_messages
                (session_id, role, content, tool_calls, reasoning_blob, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                turn.session_id,
                role_to_str(turn.role),
                turn.content,
                turn.tool_calls.as_ref().map(|v| v.to_string()),
                turn.reasoning_blob.as_ref().map(|v| v.to_string()),
                turn.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_conversation(&self, session_id: &str) -> AppResult<Vec<ConversationTurn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, role, content, tool_calls, reasoning_blob, created_at
             FROM conversation_messages WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |r| {
            let role: String = r.get(1)?;
            let tool_calls: Option<String> = r.get(3)?;
            let reasoning_blob: Option<String> = r.get(4)?;
            let created_at: String = r.get(5)?;
            Ok(ConversationTurn {
                session_id: r.get(0)?,
                role: str_to_role(&role),
                content: r.get(2)?,
                tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
                reasoning_blob: reasoning_blob.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_session(&self, session_id: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM conversation_messages WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    pub fn get_auth_config(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM auth_config WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(e) })?;
        Ok(value)
    }

    pub fn set_auth_config(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO auth_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn role_to_str(role: ConversationRole) -> &'static str {
    match role {
        ConversationRole::User => "user",
        ConversationRole::Assistant => "assistant",
        ConversationRole::Tool => "tool",
    }
}

fn str_to_role(s: &str) -> ConversationRole {
    match s {
        "assistant" => ConversationRole::Assistant,
        "tool" => ConversationRole::Tool,
        _ => ConversationRole::User,
    }
}

fn row_to_report(r: &rusqlite::Row) -> rusqlite::Result<AnalysisReport> {
    let created_at: String = r.get(4)?;
    let risk_alerts_json: String = r.get(13)?;
    Ok(AnalysisReport {
        meta: ReportMeta {
            id: Some(r.get(0)?),
            query_id: r.get(1)?,
            ticker: r.get(2)?,
            name: r.get(3)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            current_price: r.get(5)?,
            change_pct: r.get(6)?,
            report_type: r.get(7)?,
            engine_version: r.get(8)?,
        },
        summary: ReportSummary {
            sentiment_score: r.get(9)?,
            analysis_summary: r.get(10)?,
            operation_advice: r.get(11)?,
            trend_prediction: r.get(12)?,
            risk_alerts: serde_json::from_str(&risk_alerts_json).unwrap_or_default(),
        },
        strategy: ReportStrategy {
            ideal_buy: r.get(14)?,
            secondary_buy: r.get(15)?,
            stop_loss: r.get(16)?,
            take_profit: r.get(17)?,
        },
        details: ReportDetails {
            raw_result: r.get(18)?,
            context_snapshot: r.get(19)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Market;

    fn sample_report() -> AnalysisReport {
        AnalysisReport {
            meta: ReportMeta {
                id: None,
                query_id: "q1".into(),
                ticker: "600519".into(),
                name: "Kweichow Moutai".into(),
                created_at: Utc::now(),
                current_price: 100.0,
                change_pct: 1.2,
                report_type: "standard".into(),
                engine_version: "test".into(),
            },
            summary: ReportSummary {
                sentiment_score: 60.0,
                analysis_summary: "steady".into(),
                operation_advice: "hold".into(),
                trend_prediction: "sideways".into(),
                risk_alerts: vec![],
            },
            strategy: ReportStrategy::default(),
            details: ReportDetails {
                raw_result: "{}".into(),
                context_snapshot: "{}".into(),
            },
        }
    }

    #[test]
    fn save_and_fetch_round_trips() {
        let store = Store::open(":memory:").unwrap();
        let _ = Market::AShare;
        let news = NewsIntel::default();
        let id = store.save_report(&sample_report(), &news).unwrap();
        let fetched = store.get_report(id).unwrap();
        assert_eq!(fetched.report.meta.ticker, "600519");
    }

    #[test]
    fn list_reports_orders_newest_first() {
        let store = Store::open(":memory:").unwrap();
        let mut first = sample_report();
        first.meta.query_id = "first".into();
        let mut second = sample_report();
        second.meta.query_id = "second".into();
        store.save_report(&first, &NewsIntel::default()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        second.meta.created_at = Utc::now();
        store.save_report(&second, &NewsIntel::default()).unwrap();
        let list = store.list_reports("600519", 10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].report.meta.query_id, "second");
    }

    #[test]
    fn missing_report_is_not_found() {
        let store = Store::open(":memory:").unwrap();
        let err = store.get_report(999).unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn conversation_round_trips_with_reasoning_blob() {
        let store = Store::open(":memory:").unwrap();
        let turn = ConversationTurn {
            session_id: "s1".into(),
            role: ConversationRole::Assistant,
            content: "hello".into(),
            tool_calls: None,
            reasoning_blob: Some(serde_json::json!({"steps": 3})),
            created_at: Utc::now(),
        };
        store.save_conversation_turn(&turn).unwrap();
        let turns = store.list_conversation("s1").unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].reasoning_blob.as_ref().unwrap()["steps"], 3);
    }

    #[test]
    fn auth_config_upserts() {
        let store = Store::open(":memory:").unwrap();
        store.set_auth_config("admin_hash", "abc").unwrap();
        store.set_auth_config("admin_hash", "def").unwrap();
        assert_eq!(store.get_auth_config("admin_hash").unwrap(), Some("def".into()));
    }
}
