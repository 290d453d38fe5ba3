use crate::data::{round4, OhlcvRecord, ProcessedRecord};
use std::collections::BTreeMap;
use tracing::Span;

pub const SHORT_MA_WINDOW: usize = 7;
pub const LONG_MA_WINDOW: usize = 30;
pub const VOLATILITY_WINDOW: usize = 7;

/// Computes rolling analytical features for each ticker's series.
///
/// Every ticker is processed on its own chronologically sorted slice, so no
/// window ever spans two instruments. Windows are trailing and shrink at the
/// start of a series rather than producing gaps.
pub struct Transformer {
    span: Span,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self::with_span(tracing::info_span!("transformer"))
    }

    pub fn with_span(span: Span) -> Self {
        Self { span }
    }

    /// Adds `ma_7`, `ma_30`, `daily_pct_change`, `volatility_7d` and
    /// `above_ma30` to every record.
    ///
    /// # Arguments
    /// * `records`: Validated candles for any number of tickers, in any order
    ///
    /// # Returns
    /// One `ProcessedRecord` per input row, ordered by ticker, then date
    pub fn transform(&self, records: &[OhlcvRecord]) -> Vec<ProcessedRecord> {
        let _guard = self.span.enter();

        if records.is_empty() {
            tracing::warn!("received no records, skipping transformation");
            return Vec::new();
        }
        tracing::info!(rows = records.len(), "transforming");

        let mut by_ticker: BTreeMap<&str, Vec<&OhlcvRecord>> = BTreeMap::new();
        for record in records {
            by_ticker.entry(record.ticker.as_str()).or_default().push(record);
        }

        let mut processed = Vec::with_capacity(records.len());
        for (ticker, mut series) in by_ticker {
            series.sort_by_key(|r| r.date);
            tracing::debug!(ticker, rows = series.len(), "computing features");
            processed.extend(process_series(&series));
        }

        tracing::info!(rows = processed.len(), "transformation complete");
        processed
    }
}

/// Features for one ticker's chronologically sorted series.
fn process_series(series: &[&OhlcvRecord]) -> Vec<ProcessedRecord> {
    let closes: Vec<f64> = series.iter().map(|r| r.close).collect();

    let pct_changes: Vec<Option<f64>> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let previous = *closes.get(i.checked_sub(1)?)?;
            Some(round4((close - previous) / previous * 100.0))
        })
        .collect();

    series
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let ma_7 = round4(trailing_mean(&closes, i, SHORT_MA_WINDOW));
            let ma_30 = round4(trailing_mean(&closes, i, LONG_MA_WINDOW));

            ProcessedRecord {
                record: (*record).clone(),
                ma_7,
                ma_30,
                daily_pct_change: pct_changes[i],
                volatility_7d: trailing_std(&pct_changes, i, VOLATILITY_WINDOW).map(round4),
                above_ma30: record.close > ma_30,
            }
        })
        .collect()
}

fn window_start(end: usize, window: usize) -> usize {
    (end + 1).saturating_sub(window)
}

/// Mean of up to `window` values ending at `end` (inclusive).
fn trailing_mean(values: &[f64], end: usize, window: usize) -> f64 {
    let slice = &values[window_start(end, window)..=end];
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// Sample standard deviation of the defined values among the `window` rows
/// ending at `end`. Needs at least two defined values.
fn trailing_std(values: &[Option<f64>], end: usize, window: usize) -> Option<f64> {
    let defined: Vec<f64> = values[window_start(end, window)..=end]
        .iter()
        .flatten()
        .copied()
        .collect();

    if defined.len() < 2 {
        return None;
    }

    let mean = defined.iter().sum::<f64>() / defined.len() as f64;
    let variance = defined
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / (defined.len() - 1) as f64;

    Some(variance.sqrt())
}
