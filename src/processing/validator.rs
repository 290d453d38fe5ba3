use crate::data::{OhlcvRecord, RejectedRecord, Violation};
use chrono::{Local, NaiveDate};
use tracing::Span;

type Rule = fn(&OhlcvRecord, NaiveDate) -> bool;

/// Rejection rules in evaluation order. A missing field never satisfies a
/// comparison, so it cannot trigger a rule on its own.
const RULES: &[(Violation, Rule)] = &[
    (Violation::NonPositiveClose, |r, _| r.close <= 0.0),
    (Violation::NonPositiveOpen, |r, _| non_positive(r.open)),
    (Violation::NonPositiveHigh, |r, _| non_positive(r.high)),
    (Violation::NonPositiveLow, |r, _| non_positive(r.low)),
    (Violation::InvertedRange, |r, _| {
        matches!((r.high, r.low), (Some(high), Some(low)) if high < low)
    }),
    (Violation::CloseAboveHigh, |r, _| matches!(r.high, Some(high) if r.close > high)),
    (Violation::CloseBelowLow, |r, _| matches!(r.low, Some(low) if r.close < low)),
    (Violation::NonPositiveVolume, |r, _| matches!(r.volume, Some(v) if v <= 0)),
    (Violation::FutureDate, |r, today| r.date > today),
];

fn non_positive(price: Option<f64>) -> bool {
    matches!(price, Some(p) if p <= 0.0)
}

/// Splits cleaned candles into valid and rejected sets.
///
/// Nothing is dropped silently: every input row ends up in exactly one of
/// the two outputs, and rejected rows carry every rule they broke.
pub struct Validator {
    today: NaiveDate,
    span: Span,
}

impl Validator {
    /// Creates a validator treating `today` as the latest acceptable date.
    pub fn new(today: NaiveDate) -> Self {
        Self::with_span(today, tracing::info_span!("validator"))
    }

    pub fn with_span(today: NaiveDate, span: Span) -> Self {
        Self { today, span }
    }

    /// Validator for the current local calendar date.
    pub fn today() -> Self {
        Self::new(Local::now().date_naive())
    }

    /// Every rule `record` breaks, in rule order.
    pub fn violations(&self, record: &OhlcvRecord) -> Vec<Violation> {
        RULES
            .iter()
            .filter(|(_, broken)| broken(record, self.today))
            .map(|(violation, _)| *violation)
            .collect()
    }

    /// Applies every rule to every record.
    ///
    /// # Arguments
    /// * `records`: Cleaned candles
    ///
    /// # Returns
    /// A tuple of `(valid, rejected)`; each input row appears in exactly one,
    /// and input order is preserved within both
    pub fn validate(&self, records: &[OhlcvRecord]) -> (Vec<OhlcvRecord>, Vec<RejectedRecord>) {
        let _guard = self.span.enter();

        if records.is_empty() {
            tracing::warn!("received no records to validate");
            return (Vec::new(), Vec::new());
        }

        let mut valid = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        for record in records {
            let violations = self.violations(record);
            if violations.is_empty() {
                valid.push(record.clone());
            } else {
                rejected.push(RejectedRecord {
                    record: record.clone(),
                    violations,
                });
            }
        }

        tracing::info!(
            valid = valid.len(),
            rejected = rejected.len(),
            "validation complete"
        );
        for r in &rejected {
            tracing::warn!(
                ticker = %r.record.ticker,
                date = %r.record.date,
                reason = %r.rejection_reason(),
                "rejected record"
            );
        }

        (valid, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn record(day: u32, open: f64, high: f64, low: f64, close: f64, volume: i64) -> OhlcvRecord {
        OhlcvRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            ticker: "AAPL".to_string(),
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close,
            volume: Some(volume),
            fetched_at: None,
        }
    }

    fn sample() -> Vec<OhlcvRecord> {
        vec![
            record(1, 180.0, 185.0, 179.0, 184.0, 1_000_000),
            record(2, 182.0, 186.0, 181.0, 185.0, 1_200_000),
            record(3, 183.0, 187.0, 182.0, 186.0, 900_000),
        ]
    }

    #[test]
    fn test_validate_passes_clean_data() {
        let input = sample();
        let (valid, rejected) = Validator::new(today()).validate(&input);
        assert_eq!(valid, input);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_validate_rejects_negative_close() {
        let mut input = sample();
        input[0].close = -1.0;

        let (valid, rejected) = Validator::new(today()).validate(&input);
        assert_eq!(valid.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0]
            .rejection_reason()
            .contains("close price is zero or negative"));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut input = sample();
        input[1].high = Some(170.0);

        let (valid, rejected) = Validator::new(today()).validate(&input);
        assert_eq!(valid.len(), 2);
        assert_eq!(
            rejected[0].violations,
            vec![Violation::InvertedRange, Violation::CloseAboveHigh]
        );
        assert_eq!(
            rejected[0].rejection_reason(),
            "high < low: invalid price range; close > high: impossible"
        );
    }

    #[test]
    fn test_validate_collects_every_violation_in_rule_order() {
        let mut bad = record(2, -5.0, 10.0, 20.0, 0.0, 0);
        bad.date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();

        let violations = Validator::new(today()).violations(&bad);
        assert_eq!(
            violations,
            vec![
                Violation::NonPositiveClose,
                Violation::NonPositiveOpen,
                Violation::InvertedRange,
                Violation::CloseBelowLow,
                Violation::NonPositiveVolume,
                Violation::FutureDate,
            ]
        );
    }

    #[test]
    fn test_validate_rejects_zero_volume_and_future_date() {
        let mut input = sample();
        input[2].volume = Some(0);
        input[0].date = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();

        let (valid, rejected) = Validator::new(today()).validate(&input);
        assert_eq!(valid.len(), 1);
        assert_eq!(rejected[0].violations, vec![Violation::FutureDate]);
        assert_eq!(rejected[1].violations, vec![Violation::NonPositiveVolume]);
    }

    #[test]
    fn test_validate_today_is_not_future() {
        let mut input = sample();
        input[0].date = today();
        let (valid, _) = Validator::new(today()).validate(&input);
        assert_eq!(valid.len(), 3);
    }

    #[test]
    fn test_validate_missing_fields_do_not_trigger_rules() {
        let mut input = sample();
        input[0].open = None;
        input[0].high = None;
        input[0].volume = None;

        let (valid, rejected) = Validator::new(today()).validate(&input);
        assert_eq!(valid.len(), 3);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_validate_partitions_input() {
        let mut input = sample();
        input.push(record(4, 0.0, 1.0, 2.0, 3.0, 5));
        input.push(record(5, 10.0, 12.0, 9.0, 11.0, 5));

        let (valid, rejected) = Validator::new(today()).validate(&input);
        assert_eq!(valid.len() + rejected.len(), input.len());

        let mut keys: Vec<NaiveDate> = valid
            .iter()
            .map(|r| r.date)
            .chain(rejected.iter().map(|r| r.record.date))
            .collect();
        keys.sort();
        let mut expected: Vec<NaiveDate> = input.iter().map(|r| r.date).collect();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_validate_empty_input() {
        let (valid, rejected) = Validator::new(today()).validate(&[]);
        assert!(valid.is_empty());
        assert!(rejected.is_empty());
    }
}
