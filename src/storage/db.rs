//! SQLite persistence for raw and processed candles.
//!
//! Both tables are append-only and keyed by `(date, ticker)`: writes use
//! `INSERT OR IGNORE`, so re-running the pipeline for stored days is a no-op.

use crate::data::{parse_calendar_date, OhlcvRecord, ProcessedRecord, RawRecord};
use crate::error::StorageError;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::path::Path;

type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_stocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date DATE NOT NULL,
    ticker TEXT NOT NULL,
    open REAL,
    high REAL,
    low REAL,
    close REAL,
    volume INTEGER,
    fetched_at TIMESTAMP,
    UNIQUE(date, ticker)
);

CREATE TABLE IF NOT EXISTS processed_stocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date DATE NOT NULL,
    ticker TEXT NOT NULL,
    open REAL,
    high REAL,
    low REAL,
    close REAL NOT NULL,
    volume INTEGER,
    ma_7 REAL,
    ma_30 REAL,
    daily_pct_change REAL,
    volatility_7d REAL,
    above_ma30 INTEGER,
    UNIQUE(date, ticker)
);
"#;

/// Database wrapper for pipeline storage
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Create tables if they don't exist
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!("database initialized");
        Ok(())
    }

    /// Insert raw snapshot rows, skipping keys already stored.
    ///
    /// Dates are stored normalized to calendar dates and numeric cells are
    /// coerced, with unparseable values stored as NULL. Rows whose date cannot
    /// be parsed have no key and are skipped. When one batch repeats a key, the
    /// last occurrence is the one stored, as in the cleaner.
    ///
    /// # Arguments
    /// * `records`: Candles exactly as fetched
    ///
    /// # Returns
    /// The number of rows newly inserted
    ///
    /// # Errors
    /// Returns `StorageError::Sqlite` if the transaction fails; nothing from
    /// the batch is stored in that case
    pub fn save_raw(&mut self, records: &[RawRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        let mut unkeyed = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO raw_stocks
                    (date, ticker, open, high, low, close, volume, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;

            // Walked newest-first so INSERT OR IGNORE keeps the last duplicate.
            for record in records.iter().rev() {
                let Some(date) = parse_calendar_date(&record.date) else {
                    unkeyed += 1;
                    continue;
                };
                inserted += stmt.execute(params![
                    date,
                    record.ticker,
                    record.open.to_f64(),
                    record.high.to_f64(),
                    record.low.to_f64(),
                    record.close.to_f64(),
                    record.volume.to_i64(),
                    record.fetched_at,
                ])?;
            }
        }
        tx.commit()?;

        if unkeyed > 0 {
            tracing::warn!(skipped = unkeyed, "raw rows without a parseable date were not stored");
        }
        log_saved("raw_stocks", inserted, records.len() - unkeyed);
        Ok(inserted)
    }

    /// Insert processed rows, skipping keys already stored.
    ///
    /// # Arguments
    /// * `records`: Transformed rows, at most one per `(date, ticker)`
    ///
    /// # Returns
    /// The number of rows newly inserted
    ///
    /// # Errors
    /// Returns `StorageError::Sqlite` if the transaction fails
    pub fn save_processed(&mut self, records: &[ProcessedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO processed_stocks
                    (date, ticker, open, high, low, close, volume,
                     ma_7, ma_30, daily_pct_change, volatility_7d, above_ma30)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )?;

            for p in records {
                let r = &p.record;
                inserted += stmt.execute(params![
                    r.date,
                    r.ticker,
                    r.open,
                    r.high,
                    r.low,
                    r.close,
                    r.volume,
                    p.ma_7,
                    p.ma_30,
                    p.daily_pct_change,
                    p.volatility_7d,
                    p.above_ma30 as i64,
                ])?;
            }
        }
        tx.commit()?;

        log_saved("processed_stocks", inserted, records.len());
        Ok(inserted)
    }

    /// Load processed rows ordered by ticker then date, optionally for one ticker.
    pub fn load_processed(&self, ticker: Option<&str>) -> Result<Vec<ProcessedRecord>> {
        let mut sql = String::from(
            r#"
            SELECT date, ticker, open, high, low, close, volume,
                   ma_7, ma_30, daily_pct_change, volatility_7d, above_ma30
            FROM processed_stocks
            "#,
        );
        if ticker.is_some() {
            sql.push_str(" WHERE ticker = ?1");
        }
        sql.push_str(" ORDER BY ticker, date");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match ticker {
            Some(t) => stmt
                .query_map(params![t], map_processed_row)?
                .collect::<SqliteResult<Vec<_>>>()?,
            None => stmt
                .query_map([], map_processed_row)?
                .collect::<SqliteResult<Vec<_>>>()?,
        };

        Ok(rows)
    }

    /// Distinct tickers with processed data, sorted.
    pub fn tickers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT ticker FROM processed_stocks ORDER BY ticker")?;
        let tickers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(tickers)
    }

    /// Number of stored raw rows.
    pub fn raw_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM raw_stocks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn map_processed_row(row: &Row) -> SqliteResult<ProcessedRecord> {
    Ok(ProcessedRecord {
        record: OhlcvRecord {
            date: row.get(0)?,
            ticker: row.get(1)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            volume: row.get(6)?,
            fetched_at: None,
        },
        ma_7: row.get(7)?,
        ma_30: row.get(8)?,
        daily_pct_change: row.get(9)?,
        volatility_7d: row.get(10)?,
        above_ma30: row.get::<_, i64>(11)? != 0,
    })
}

fn log_saved(table: &str, inserted: usize, attempted: usize) {
    tracing::info!(
        table,
        inserted,
        skipped = attempted - inserted,
        "saved rows (duplicates skipped)"
    );
}
