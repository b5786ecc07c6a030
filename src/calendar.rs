//! Calendar Gate (C2)
//! Mission: decide whether today is a trading day for a given market — a
//! pure function of (date, market, calendar).

use crate::models::Market;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;

/// The exchange's local timezone, used to resolve "today" for the gate
/// decision rather than the process's UTC date — a trading day is local to
/// the exchange, not to wherever this process happens to run.
fn market_timezone(market: Market) -> Tz {
    match market {
        Market::AShare => chrono_tz::Asia::Shanghai,
        Market::HongKong => chrono_tz::Asia::Hong_Kong,
        Market::UnitedStates => chrono_tz::America::New_York,
    }
}

/// Today's date in `market`'s local timezone.
pub fn local_today(market: Market) -> NaiveDate {
    Utc::now().with_timezone(&market_timezone(market)).date_naive()
}

/// A market's holiday calendar. Pure data; `is_trading_day` is a pure function.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    holidays: HashSet<NaiveDate>,
}

impl Calendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        !self.holidays.contains(&date)
    }
}

/// Holds one calendar per market and decides run/skip per ticker.
pub struct CalendarGate {
    a_share: Calendar,
    hong_kong: Calendar,
    united_states: Calendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    Skip,
}

impl CalendarGate {
    pub fn new(a_share: Calendar, hong_kong: Calendar, united_states: Calendar) -> Self {
        Self {
            a_share,
            hong_kong,
            united_states,
        }
    }

    /// A reasonable boot-time default: weekends closed, no named holidays.
    /// Operators supply the real holiday lists via `new`.
    pub fn with_defaults() -> Self {
        Self::new(Calendar::default(), Calendar::default(), Calendar::default())
    }

    fn calendar_for(&self, market: Market) -> &Calendar {
        match market {
            Market::AShare => &self.a_share,
            Market::HongKong => &self.hong_kong,
            Market::UnitedStates => &self.united_states,
        }
    }

    /// Decide run/skip for one ticker's market on `date`.
    pub fn decide(&self, date: NaiveDate, market: Market) -> GateDecision {
        if self.calendar_for(market).is_trading_day(date) {
            GateDecision::Run
        } else {
            GateDecision::Skip
        }
    }

    /// Partition a batch by market, returning only tickers whose market is
    /// open today. If every market in the batch is closed, the caller should
    /// treat the whole batch as skipped.
    pub fn partition<'a, T>(
        &self,
        date: NaiveDate,
        items: &'a [T],
        market_of: impl Fn(&T) -> Option<Market>,
    ) -> (Vec<&'a T>, Vec<&'a T>) {
        let mut run = Vec::new();
        let mut skip = Vec::new();
        for item in items {
            match market_of(item) {
                Some(market) if self.decide(date, market) == GateDecision::Run => run.push(item),
                _ => skip.push(item),
            }
        }
        (run, skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekend_is_always_closed() {
        let gate = CalendarGate::with_defaults();
        // 2026-08-01 is a Saturday.
        let saturday = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(gate.decide(saturday, Market::AShare), GateDecision::Skip);
    }

    #[test]
    fn weekday_without_holiday_runs() {
        let gate = CalendarGate::with_defaults();
        let monday = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        assert_eq!(gate.decide(monday, Market::UnitedStates), GateDecision::Run);
    }

    #[test]
    fn named_holiday_skips() {
        let new_years = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let a_share = Calendar::new([new_years]);
        let gate = CalendarGate::new(a_share, Calendar::default(), Calendar::default());
        assert_eq!(gate.decide(new_years, Market::AShare), GateDecision::Skip);
    }

    #[test]
    fn partition_splits_batch_by_gate() {
        let gate = CalendarGate::with_defaults();
        let monday = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let tickers = vec!["AAPL".to_string(), "600519".to_string()];
        let (run, _skip) = gate.partition(monday, &tickers, |_| Some(Market::UnitedStates));
        assert_eq!(run.len(), 2);
    }

    #[test]
    fn property_pure_function_of_date_and_market() {
        let gate = CalendarGate::with_defaults();
        for day_offset in 0..3650 {
            let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(day_offset);
            let d1 = gate.decide(date, Market::AShare);
            let d2 = gate.decide(date, Market::AShare);
            assert_eq!(d1, d2);
        }
    }

    #[test]
    fn local_today_differs_by_at_most_a_day_from_utc() {
        let utc_today = Utc::now().date_naive();
        for market in [Market::AShare, Market::HongKong, Market::UnitedStates] {
            let local = local_today(market);
            assert!((local - utc_today).num_days().abs() <= 1);
        }
    }
}
