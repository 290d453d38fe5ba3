use crate::data::{parse_calendar_date, round4, OhlcvRecord, RawRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::Span;

/// Counts of every repair the cleaner made during one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub bad_dates: usize,
    pub duplicates: usize,
    pub missing_close: usize,
    pub forward_filled: usize,
    pub output: usize,
}

/// Numeric fields after coercion, before the missing-close drop and
/// forward fill.
struct Coerced<'a> {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<i64>,
    source: &'a RawRecord,
}

/// Turns raw fetched candles into typed, deduplicated, gap-filled records.
///
/// Cleaning never fails: unusable rows are dropped and missing fields are
/// filled, and every such action is counted and logged.
pub struct Cleaner {
    span: Span,
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner {
    pub fn new() -> Self {
        Self::with_span(tracing::info_span!("cleaner"))
    }

    /// Creates a cleaner that logs inside the given span.
    pub fn with_span(span: Span) -> Self {
        Self { span }
    }

    /// Cleans `records`, returning them grouped by ticker in date order.
    ///
    /// Steps, in order:
    /// 1. normalize `date` to a calendar date (unparseable dates are dropped)
    /// 2. deduplicate on `(date, ticker)`, last occurrence wins
    /// 3. coerce numeric fields, unparseable values become missing
    /// 4. drop rows with a missing `close`
    /// 5. forward-fill `open`, `high`, `low`, `volume` within each ticker
    /// 6. round prices to 4 decimals
    ///
    /// # Arguments
    /// * `records`: Raw candles for any number of tickers, in any order
    ///
    /// # Returns
    /// The cleaned records and a [`CleanStats`] counting every row dropped
    /// and every field filled
    pub fn clean(&self, records: &[RawRecord]) -> (Vec<OhlcvRecord>, CleanStats) {
        let _guard = self.span.enter();
        let mut stats = CleanStats::default();

        if records.is_empty() {
            tracing::warn!("received no records, nothing to clean");
            return (Vec::new(), stats);
        }
        tracing::info!(rows = records.len(), "starting cleaning");

        // BTreeMap keyed by (ticker, date) gives both the dedup and the
        // ticker-then-chronological output order.
        let mut unique: BTreeMap<(&str, NaiveDate), &RawRecord> = BTreeMap::new();
        for record in records {
            let Some(date) = parse_calendar_date(&record.date) else {
                stats.bad_dates += 1;
                continue;
            };
            if unique.insert((record.ticker.as_str(), date), record).is_some() {
                stats.duplicates += 1;
            }
        }
        if stats.bad_dates > 0 {
            tracing::warn!(dropped = stats.bad_dates, "dropped rows with unparseable date");
        }
        tracing::info!(
            rows = unique.len(),
            removed = stats.duplicates,
            "after dedup"
        );

        let coerced: Vec<((&str, NaiveDate), Coerced)> = unique
            .into_iter()
            .map(|(key, raw)| (key, coerce(raw)))
            .collect();

        let before = coerced.len();
        let with_close: Vec<_> = coerced
            .into_iter()
            .filter_map(|(key, row)| row.close.map(|close| (key, close, row)))
            .collect();
        stats.missing_close = before - with_close.len();
        tracing::info!(dropped = stats.missing_close, "dropped rows with missing close price");

        let mut cleaned = Vec::with_capacity(with_close.len());
        let mut last = FillState::default();
        for ((ticker, date), close, row) in with_close {
            if last.ticker != Some(ticker) {
                last = FillState {
                    ticker: Some(ticker),
                    ..FillState::default()
                };
            }

            let filled = &mut stats.forward_filled;
            let open = carry_forward(&mut last.open, row.open, filled);
            let high = carry_forward(&mut last.high, row.high, filled);
            let low = carry_forward(&mut last.low, row.low, filled);
            let volume = carry_forward(&mut last.volume, row.volume, filled);

            cleaned.push(OhlcvRecord {
                date,
                ticker: ticker.to_string(),
                open: open.map(round4),
                high: high.map(round4),
                low: low.map(round4),
                close: round4(close),
                volume,
                fetched_at: row.source.fetched_at,
            });
        }
        if stats.forward_filled > 0 {
            tracing::info!(fields = stats.forward_filled, "forward-filled missing values");
        }

        stats.output = cleaned.len();
        tracing::info!(rows = stats.output, "cleaning complete");
        (cleaned, stats)
    }
}

fn coerce(raw: &RawRecord) -> Coerced<'_> {
    Coerced {
        open: raw.open.to_f64(),
        high: raw.high.to_f64(),
        low: raw.low.to_f64(),
        close: raw.close.to_f64(),
        volume: raw.volume.to_i64(),
        source: raw,
    }
}

/// Most recent seen value per fillable field for the ticker being walked.
#[derive(Default)]
struct FillState<'a> {
    ticker: Option<&'a str>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    volume: Option<i64>,
}

fn carry_forward<T: Copy>(prior: &mut Option<T>, current: Option<T>, filled: &mut usize) -> Option<T> {
    match current {
        Some(value) => {
            *prior = Some(value);
            Some(value)
        }
        None => {
            if prior.is_some() {
                *filled += 1;
            }
            *prior
        }
    }
}
