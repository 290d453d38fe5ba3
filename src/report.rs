use crate::data::ProcessedRecord;
use chrono::NaiveDate;
use serde::Serialize;

/// Latest indicator values for one ticker.
///
/// # Fields
/// * `ticker`: The instrument
/// * `date`: Date of the most recent processed row
/// * `close`: Latest closing price
/// * `daily_pct_change`: Percent change versus the previous trading day
/// * `ma_7` / `ma_30`: Trailing moving averages of the close
/// * `volatility_7d`: Trailing standard deviation of daily percent change
/// * `above_ma30`: Whether the close is above its 30-day average
/// * `rows`: Number of rows in the selected range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: f64,
    pub daily_pct_change: Option<f64>,
    pub ma_7: f64,
    pub ma_30: f64,
    pub volatility_7d: Option<f64>,
    pub above_ma30: bool,
    pub rows: usize,
}

/// Keeps rows whose date falls inside `[from, to]`; open bounds are unbounded.
pub fn filter_range(
    records: Vec<ProcessedRecord>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<ProcessedRecord> {
    records
        .into_iter()
        .filter(|r| from.map_or(true, |f| r.record.date >= f))
        .filter(|r| to.map_or(true, |t| r.record.date <= t))
        .collect()
}

/// One snapshot per ticker, from rows ordered by ticker then date.
pub fn snapshots(records: &[ProcessedRecord]) -> Vec<Snapshot> {
    let mut out: Vec<Snapshot> = Vec::new();

    for r in records {
        let snapshot = Snapshot {
            ticker: r.record.ticker.clone(),
            date: r.record.date,
            close: r.record.close,
            daily_pct_change: r.daily_pct_change,
            ma_7: r.ma_7,
            ma_30: r.ma_30,
            volatility_7d: r.volatility_7d,
            above_ma30: r.above_ma30,
            rows: 1,
        };

        match out.last_mut() {
            Some(last) if last.ticker == snapshot.ticker => {
                let rows = last.rows + 1;
                *last = Snapshot { rows, ..snapshot };
            }
            _ => out.push(snapshot),
        }
    }

    out
}

fn opt(value: Option<f64>, suffix: &str) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}{suffix}"))
}

/// Prints the KPI block for one ticker.
pub fn print_snapshot(s: &Snapshot) {
    println!("\n{} ({} rows, latest {})", s.ticker, s.rows, s.date);
    println!(
        "Latest Close: {:.2} ({})",
        s.close,
        s.daily_pct_change
            .map_or_else(|| "-".to_string(), |v| format!("{v:+.2}%"))
    );
    println!("7-Day MA: {:.2}", s.ma_7);
    println!("30-Day MA: {:.2}", s.ma_30);
    println!("7-Day Volatility: {}", opt(s.volatility_7d, "%"));
    println!(
        "Trend: {} 30-day MA",
        if s.above_ma30 { "above" } else { "below" }
    );
}

/// Prints the processed rows as a fixed-width table.
pub fn print_table(records: &[ProcessedRecord]) {
    println!(
        "\n{:<12} {:<14} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10} {:>10} {:>9} {:>8} {:>6}",
        "date", "ticker", "open", "high", "low", "close", "volume", "ma_7", "ma_30", "pct_chg",
        "vol_7d", ">ma30"
    );
    for r in records {
        let rec = &r.record;
        println!(
            "{:<12} {:<14} {:>10} {:>10} {:>10} {:>10.2} {:>12} {:>10.2} {:>10.2} {:>9} {:>8} {:>6}",
            rec.date.to_string(),
            rec.ticker,
            opt(rec.open, ""),
            opt(rec.high, ""),
            opt(rec.low, ""),
            rec.close,
            rec.volume.map_or_else(|| "-".to_string(), |v| v.to_string()),
            r.ma_7,
            r.ma_30,
            opt(r.daily_pct_change, ""),
            opt(r.volatility_7d, ""),
            u8::from(r.above_ma30),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OhlcvRecord;

    fn row(ticker: &str, day: u32, close: f64) -> ProcessedRecord {
        ProcessedRecord {
            record: OhlcvRecord {
                date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                ticker: ticker.to_string(),
                open: None,
                high: None,
                low: None,
                close,
                volume: None,
                fetched_at: None,
            },
            ma_7: close,
            ma_30: close,
            daily_pct_change: None,
            volatility_7d: None,
            above_ma30: false,
        }
    }

    #[test]
    fn test_snapshots_take_latest_row_per_ticker() {
        let rows = vec![
            row("INFY.NS", 1, 10.0),
            row("INFY.NS", 2, 11.0),
            row("TCS.NS", 1, 20.0),
        ];

        let snaps = snapshots(&rows);
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].ticker, "INFY.NS");
        assert_eq!(snaps[0].close, 11.0);
        assert_eq!(snaps[0].rows, 2);
        assert_eq!(snaps[1].rows, 1);
    }

    #[test]
    fn test_filter_range_is_inclusive() {
        let rows = vec![row("X", 1, 1.0), row("X", 2, 2.0), row("X", 3, 3.0)];
        let kept = filter_range(
            rows,
            NaiveDate::from_ymd_opt(2024, 1, 2),
            NaiveDate::from_ymd_opt(2024, 1, 3),
        );
        let closes: Vec<f64> = kept.iter().map(|r| r.record.close).collect();
        assert_eq!(closes, vec![2.0, 3.0]);
    }

    #[test]
    fn test_snapshots_empty() {
        assert!(snapshots(&[]).is_empty());
    }
}
