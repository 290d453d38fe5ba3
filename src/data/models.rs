use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A numeric cell as delivered by a data source, before type coercion.
///
/// Sources are not trusted to deliver well-typed values: a price may arrive
/// as a JSON number, as text, or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    #[default]
    Missing,
}

impl RawValue {
    /// Coerces the cell to a finite `f64`, or `None` if it cannot be parsed.
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            RawValue::Number(n) => *n,
            RawValue::Text(s) => s.trim().parse::<f64>().ok()?,
            RawValue::Missing => return None,
        };

        value.is_finite().then_some(value)
    }

    /// Coerces the cell to a whole count, truncating any fraction.
    ///
    /// Values outside the `i64` range are treated as missing rather than
    /// saturated.
    pub fn to_i64(&self) -> Option<i64> {
        let value = self.to_f64()?.trunc();
        (value >= i64::MIN as f64 && value < i64::MAX as f64).then_some(value as i64)
    }

    /// Converts a JSON cell, treating anything that is not a number or a
    /// string as missing.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map_or(RawValue::Missing, RawValue::Number),
            serde_json::Value::String(s) => RawValue::Text(s.clone()),
            _ => RawValue::Missing,
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<Option<f64>> for RawValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(RawValue::Missing, RawValue::Number)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// One fetched candle exactly as the source delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub date: String,
    pub ticker: String,
    pub open: RawValue,
    pub high: RawValue,
    pub low: RawValue,
    pub close: RawValue,
    pub volume: RawValue,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// A cleaned daily candle for one instrument.
///
/// `close` is always present; the remaining numeric fields can still be
/// missing when no earlier value existed to forward-fill from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl From<&OhlcvRecord> for RawRecord {
    fn from(record: &OhlcvRecord) -> Self {
        RawRecord {
            date: record.date.format("%Y-%m-%d").to_string(),
            ticker: record.ticker.clone(),
            open: record.open.into(),
            high: record.high.into(),
            low: record.low.into(),
            close: record.close.into(),
            volume: record.volume.map(|v| v as f64).into(),
            fetched_at: record.fetched_at,
        }
    }
}

/// A cleaned candle enriched with rolling features computed over its
/// ticker's chronologically sorted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    #[serde(flatten)]
    pub record: OhlcvRecord,
    pub ma_7: f64,
    pub ma_30: f64,
    pub daily_pct_change: Option<f64>,
    pub volatility_7d: Option<f64>,
    pub above_ma30: bool,
}

/// A business rule a candle can break.
///
/// Variants are declared in evaluation order, which is also the order their
/// descriptions appear in a rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    NonPositiveClose,
    NonPositiveOpen,
    NonPositiveHigh,
    NonPositiveLow,
    InvertedRange,
    CloseAboveHigh,
    CloseBelowLow,
    NonPositiveVolume,
    FutureDate,
}

impl Violation {
    pub fn description(self) -> &'static str {
        match self {
            Violation::NonPositiveClose => "close price is zero or negative",
            Violation::NonPositiveOpen => "open price is zero or negative",
            Violation::NonPositiveHigh => "high price is zero or negative",
            Violation::NonPositiveLow => "low price is zero or negative",
            Violation::InvertedRange => "high < low: invalid price range",
            Violation::CloseAboveHigh => "close > high: impossible",
            Violation::CloseBelowLow => "close < low: impossible",
            Violation::NonPositiveVolume => "volume is zero or negative",
            Violation::FutureDate => "date is in the future",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A candle that failed validation, with every rule it broke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub record: OhlcvRecord,
    pub violations: Vec<Violation>,
}

impl RejectedRecord {
    pub fn rejection_reason(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.description())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parses a date or timestamp string down to its calendar date.
///
/// Offset-qualified timestamps keep the wall-clock date in their own offset,
/// so `2024-01-02T00:30:00+05:30` is 2024-01-02, not the UTC date.
pub fn parse_calendar_date(input: &str) -> Option<NaiveDate> {
    let s = input.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.date_naive());
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }

    None
}

/// Rounds to 4 decimal places, ties to even.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round_ties_even() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_value_coercion() {
        assert_eq!(RawValue::Number(184.5).to_f64(), Some(184.5));
        assert_eq!(RawValue::from(" 185.25 ").to_f64(), Some(185.25));
        assert_eq!(RawValue::from("n/a").to_f64(), None);
        assert_eq!(RawValue::Number(f64::NAN).to_f64(), None);
        assert_eq!(RawValue::Missing.to_f64(), None);
    }

    #[test]
    fn test_raw_value_to_i64_rejects_out_of_range() {
        assert_eq!(RawValue::Number(1_500_000.9).to_i64(), Some(1_500_000));
        assert_eq!(RawValue::from("1200000").to_i64(), Some(1_200_000));
        assert_eq!(RawValue::Number(-3.7).to_i64(), Some(-3));
        assert_eq!(RawValue::Number(1e20).to_i64(), None);
        assert_eq!(RawValue::Number(-1e20).to_i64(), None);
        assert_eq!(RawValue::Number(i64::MAX as f64).to_i64(), None);
        assert_eq!(RawValue::Missing.to_i64(), None);
    }

    #[test]
    fn test_raw_value_from_json() {
        assert_eq!(RawValue::from_json(&serde_json::json!(12.5)), RawValue::Number(12.5));
        assert_eq!(RawValue::from_json(&serde_json::json!("12.5")), RawValue::from("12.5"));
        assert_eq!(RawValue::from_json(&serde_json::Value::Null), RawValue::Missing);
    }

    #[test]
    fn test_parse_calendar_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        for input in [
            "2024-01-02",
            "2024-01-02T09:30:00Z",
            "2024-01-02T00:30:00+05:30",
            "2024-01-02 00:00:00-05:00",
            "2024-01-02 09:30:00",
            " 2024-01-02 ",
        ] {
            assert_eq!(parse_calendar_date(input), Some(expected), "input: {input}");
        }
        assert_eq!(parse_calendar_date("yesterday"), None);
    }

    #[test]
    fn test_round4_half_to_even() {
        assert_eq!(round4(100.0 / 184.0), 0.5435);
        assert_eq!(round4(100.0 / 185.0), 0.5405);
        assert_eq!(round4(184.12344), 184.1234);
    }

    #[test]
    fn test_rejection_reason_joins_in_order() {
        let rejected = RejectedRecord {
            record: OhlcvRecord {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                ticker: "X".to_string(),
                open: Some(1.0),
                high: Some(1.0),
                low: Some(2.0),
                close: -1.0,
                volume: Some(10),
                fetched_at: None,
            },
            violations: vec![Violation::NonPositiveClose, Violation::InvertedRange],
        };
        assert_eq!(
            rejected.rejection_reason(),
            "close price is zero or negative; high < low: invalid price range"
        );
    }
}
