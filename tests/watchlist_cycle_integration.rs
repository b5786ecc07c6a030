//! Exercises the non-networked half of a daily watchlist cycle end to end:
//! the calendar gate's run/skip decision, the indicator engine's snapshot
//! over a synthetic candle series, and persistence of the resulting report.

use chrono::{NaiveDate, TimeZone, Utc};
use dsa_analyst::calendar::{CalendarGate, GateDecision};
use dsa_analyst::indicators::compute_snapshot;
use dsa_analyst::models::{
    AnalysisReport, Candle, Market, NewsIntel, ReportDetails, ReportMeta, ReportStrategy, ReportSummary,
};
use dsa_analyst::persistence::Store;

fn rising_candles(days: i64) -> Vec<Candle> {
    let start = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
    (0..days)
        .map(|i| {
            let close = 100.0 + i as f64;
            Candle {
                date: start + chrono::Duration::days(i),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
                amount: None,
            }
        })
        .collect()
}

#[test]
fn trading_day_gate_allows_a_weekday_with_no_holiday() {
    let gate = CalendarGate::with_defaults();
    let tuesday = NaiveDate::from_ymd_opt(2026, 8, 4).unwrap();
    assert_eq!(gate.decide(tuesday, Market::UnitedStates), GateDecision::Run);
}

#[test]
fn trading_day_gate_skips_a_weekend() {
    let gate = CalendarGate::with_defaults();
    let saturday = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
    assert_eq!(gate.decide(saturday, Market::UnitedStates), GateDecision::Skip);
}

#[test]
fn rising_series_yields_bullish_alignment_and_report_round_trips() {
    let candles = rising_candles(30);
    let snapshot = compute_snapshot(&candles, None, false);
    assert!(snapshot.bullish_alignment, "30 strictly rising closes should align MA5 > MA10 > MA20");
    assert!(snapshot.ma20.is_some());

    let store = Store::open(":memory:").unwrap();
    let report = AnalysisReport {
        meta: ReportMeta {
            id: None,
            query_id: "cycle-test".into(),
            ticker: "AAPL".into(),
            name: "Apple Inc.".into(),
            created_at: Utc.with_ymd_and_hms(2026, 6, 30, 9, 0, 0).unwrap(),
            current_price: candles.last().unwrap().close,
            change_pct: 1.0,
            report_type: "standard".into(),
            engine_version: "test".into(),
        },
        summary: ReportSummary {
            sentiment_score: 72.0,
            analysis_summary: "steady uptrend".into(),
            operation_advice: "hold".into(),
            trend_prediction: "up".into(),
            risk_alerts: vec![],
        },
        strategy: ReportStrategy::default(),
        details: ReportDetails {
            raw_result: "{}".into(),
            context_snapshot: serde_json::to_string(&snapshot).unwrap(),
        },
    };

    let id = store.save_report(&report, &NewsIntel::default()).unwrap();
    let fetched = store.get_report(id).unwrap();
    assert_eq!(fetched.report.meta.ticker, "AAPL");
    assert_eq!(fetched.report.meta.query_id, "cycle-test");

    let latest = store.latest_report("AAPL").unwrap().unwrap();
    assert_eq!(latest.report.meta.id, Some(id));
}
