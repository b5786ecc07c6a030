//! Technical Indicator Engine (C6)
//! Mission: pure functions over a candle series; no I/O

use crate::models::{Candle, Quote, TechnicalSnapshot};
use chrono::Utc;

fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    out.push(values[0]);
    for v in &values[1..] {
        let prev = *out.last().unwrap();
        out.push(alpha * v + (1.0 - alpha) * prev);
    }
    out
}

fn macd(closes: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
    if closes.len() < 26 {
        return (None, None, None);
    }
    let ema12 = ema_series(closes, 12);
    let ema26 = ema_series(closes, 26);
    let macd_line: Vec<f64> = ema12.iter().zip(ema26.iter()).map(|(a, b)| a - b).collect();
    if macd_line.len() < 9 {
        return (macd_line.last().copied(), None, None);
    }
    let signal_series = ema_series(&macd_line, 9);
    let line = *macd_line.last().unwrap();
    let signal = *signal_series.last().unwrap();
    (Some(line), Some(signal), Some(line - signal))
}

fn rsi14(closes: &[f64]) -> Option<f64> {
    let period = 14;
    if closes.len() <= period {
        return None;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for window in closes.windows(2).rev().take(period) {
        let delta = window[1] - window[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    if gains + losses == 0.0 {
        return Some(50.0);
    }
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = (gains / period as f64) / (losses / period as f64);
    Some(100.0 - 100.0 / (1.0 + rs))
}

fn bias_pct(closes: &[f64]) -> Option<f64> {
    let ma20 = sma(closes, 20)?;
    let last = *closes.last()?;
    if ma20 == 0.0 {
        return None;
    }
    Some((last - ma20) / ma20 * 100.0)
}

/// A rough trend-strength estimate derived from recent directional persistence,
/// used only to widen the bias acceptance band.
fn trend_strength(closes: &[f64]) -> f64 {
    if closes.len() < 20 {
        return 0.0;
    }
    let window = &closes[closes.len() - 20..];
    let up_days = window
        .windows(2)
        .filter(|pair| pair[1] >= pair[0])
        .count();
    up_days as f64 / (window.len() - 1) as f64 * 100.0
}

/// Append a synthetic candle carrying forward prior-day open/high/low but with
/// `close` set to the live price, for MA/alignment purposes only.
fn with_virtual_candle(candles: &[Candle], quote: &Quote) -> Vec<Candle> {
    let mut out = candles.to_vec();
    if let Some(last) = candles.last() {
        out.push(Candle {
            date: last.date,
            open: last.open,
            high: last.high,
            low: last.low,
            close: quote.price,
            volume: 0.0,
            amount: None,
        });
    }
    out
}

/// Compute the technical snapshot for a candle series, optionally injecting an
/// intraday virtual candle from a live quote.
pub fn compute_snapshot(
    candles: &[Candle],
    quote: Option<&Quote>,
    enable_intraday_virtual_candle: bool,
) -> TechnicalSnapshot {
    let today = Utc::now().date_naive();
    let use_virtual = enable_intraday_virtual_candle
        && quote.is_some_and(|q| q.timestamp.date_naive() == today);

    let series: Vec<Candle> = match (use_virtual, quote) {
        (true, Some(q)) => with_virtual_candle(candles, q),
        _ => candles.to_vec(),
    };
    let closes: Vec<f64> = series.iter().map(|c| c.close).collect();

    let ma5 = sma(&closes, 5);
    let ma10 = sma(&closes, 10);
    let ma20 = sma(&closes, 20);
    let bullish_alignment = matches!((ma5, ma10, ma20), (Some(a), Some(b), Some(c)) if a > b && b > c);

    let (macd_line, macd_signal, macd_histogram) = macd(&closes);

    TechnicalSnapshot {
        ma5,
        ma10,
        ma20,
        macd_line,
        macd_signal,
        macd_histogram,
        rsi14: rsi14(&closes),
        bias_pct: bias_pct(&closes),
        bullish_alignment,
        used_virtual_candle: use_virtual,
    }
}

/// The effective bias-acceptance band, widened 1.5x under a strong bullish
/// trend.
pub fn effective_bias_band(base_threshold: f64, candles: &[Candle], snapshot: &TechnicalSnapshot) -> f64 {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    if snapshot.bullish_alignment && trend_strength(&closes) >= 70.0 {
        base_threshold * 1.5
    } else {
        base_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn candle_series(closes: &[f64]) -> Vec<Candle> {
        let base = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                date: base + Duration::days(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1000.0,
                amount: None,
            })
            .collect()
    }

    #[test]
    fn ma_requires_enough_history() {
        let candles = candle_series(&[1.0, 2.0, 3.0]);
        let snapshot = compute_snapshot(&candles, None, true);
        assert!(snapshot.ma5.is_none());
    }

    #[test]
    fn bullish_alignment_true_when_ma5_gt_ma10_gt_ma20() {
        let closes: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let candles = candle_series(&closes);
        let snapshot = compute_snapshot(&candles, None, true);
        assert!(snapshot.bullish_alignment);
        assert!(snapshot.ma5.unwrap() > snapshot.ma10.unwrap());
    }

    #[test]
    fn virtual_candle_only_applied_for_same_day_quote() {
        let closes: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let candles = candle_series(&closes);
        let stale_quote = Quote {
            ticker: "AAPL".into(),
            price: 999.0,
            change_pct: 0.0,
            timestamp: Utc::now() - Duration::days(5),
            source_id: "test".into(),
        };
        let snapshot = compute_snapshot(&candles, Some(&stale_quote), true);
        assert!(!snapshot.used_virtual_candle);

        let fresh_quote = Quote {
            timestamp: Utc::now(),
            ..stale_quote
        };
        let snapshot = compute_snapshot(&candles, Some(&fresh_quote), true);
        assert!(snapshot.used_virtual_candle);
    }

    #[test]
    fn rsi_is_100_when_only_gains() {
        let closes: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let candles = candle_series(&closes);
        let snapshot = compute_snapshot(&candles, None, true);
        assert_eq!(snapshot.rsi14, Some(100.0));
    }

    #[test]
    fn strong_trend_widens_band() {
        let closes: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let candles = candle_series(&closes);
        let snapshot = compute_snapshot(&candles, None, true);
        let band = effective_bias_band(8.0, &candles, &snapshot);
        assert!(band >= 8.0);
    }
}
