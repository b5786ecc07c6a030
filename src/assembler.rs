//! Context Assembler (C7)
//! Mission: combine quote, candles, technicals, news, and prior-report
//! context into the `EvidenceBundle` given to the LLM, truncating any field
//! that would blow the context budget.

use crate::models::{Candle, EvidenceBundle, Market, NewsIntel, Quote, TechnicalSnapshot, Ticker};

/// Candles beyond this many trailing trading days are truncated before being
/// embedded in the prompt.
const MAX_CANDLES_IN_CONTEXT: usize = 120;
/// Prior-report free text longer than this is truncated.
const MAX_PREVIOUS_CONTEXT_CHARS: usize = 2000;

pub struct AssemblerInput<'a> {
    pub ticker: &'a Ticker,
    pub name: String,
    pub market: Market,
    pub quote: Option<Quote>,
    pub candles: Vec<Candle>,
    pub technicals: Option<TechnicalSnapshot>,
    pub news: NewsIntel,
    pub previous_report_context: Option<String>,
}

pub fn assemble(input: AssemblerInput<'_>) -> EvidenceBundle {
    let mut truncated_fields = Vec::new();

    let candles = if input.candles.len() > MAX_CANDLES_IN_CONTEXT {
        truncated_fields.push("candles".to_string());
        input.candles[input.candles.len() - MAX_CANDLES_IN_CONTEXT..].to_vec()
    } else {
        input.candles
    };

    let previous_report_context = input.previous_report_context.map(|ctx| {
        if ctx.len() > MAX_PREVIOUS_CONTEXT_CHARS {
            truncated_fields.push("previous_report_context".to_string());
            ctx.chars().take(MAX_PREVIOUS_CONTEXT_CHARS).collect()
        } else {
            ctx
        }
    });

    EvidenceBundle {
        ticker: input.ticker.as_str().to_string(),
        name: input.name,
        market: input.market,
        quote: input.quote,
        candles,
        technicals: input.technicals,
        news: input.news,
        previous_report_context,
        truncated_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candle(i: i64) -> Candle {
        Candle {
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Duration::days(i),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            amount: None,
        }
    }

    #[test]
    fn oversized_candle_series_is_truncated_and_flagged() {
        let ticker = Ticker::canonical("AAPL");
        let candles: Vec<Candle> = (0..200).map(candle).collect();
        let bundle = assemble(AssemblerInput {
            ticker: &ticker,
            name: "Apple".into(),
            market: Market::UnitedStates,
            quote: None,
            candles,
            technicals: None,
            news: NewsIntel::default(),
            previous_report_context: None,
        });
        assert_eq!(bundle.candles.len(), MAX_CANDLES_IN_CONTEXT);
        assert!(bundle.truncated_fields.contains(&"candles".to_string()));
    }

    #[test]
    fn small_inputs_are_not_flagged() {
        let ticker = Ticker::canonical("AAPL");
        let bundle = assemble(AssemblerInput {
            ticker: &ticker,
            name: "Apple".into(),
            market: Market::UnitedStates,
            quote: None,
            candles: vec![candle(0)],
            technicals: None,
            news: NewsIntel::default(),
            previous_report_context: Some("short".into()),
        });
        assert!(bundle.truncated_fields.is_empty());
    }
}
