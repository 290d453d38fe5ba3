use crate::config::Config;
use crate::data::{DataIngestion, RawRecord, RejectedRecord};
use crate::processing::{Cleaner, Transformer, Validator};
use crate::storage::Database;
use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Utc};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Row counts from one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub raw_inserted: usize,
    pub cleaned: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub forward_filled: usize,
    pub valid: usize,
    pub rejected: usize,
    pub processed: usize,
    pub processed_inserted: usize,
}

/// Runs Fetch, Clean, Validate, Transform and Store for the configured tickers.
pub struct Pipeline {
    config: Config,
    ingestion: DataIngestion,
    db: Database,
    cleaner: Cleaner,
    transformer: Transformer,
}

impl Pipeline {
    pub fn new(config: Config, ingestion: DataIngestion, db: Database) -> Self {
        Self {
            config,
            ingestion,
            db,
            cleaner: Cleaner::new(),
            transformer: Transformer::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Runs the full pipeline once over every configured ticker.
    ///
    /// Fails only when no ticker yields data or storage is unavailable;
    /// per-ticker fetch failures and rejected rows are logged and survived.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let started = Utc::now();
        tracing::info!(%started, "pipeline started");

        let raw = self.ingestion.fetch_all(&self.config.tickers).await;
        if raw.is_empty() {
            bail!("pipeline aborted: no data fetched for any ticker");
        }

        let summary = self.process(&raw)?;
        tracing::info!(?summary, finished = %Utc::now(), "pipeline completed");
        Ok(summary)
    }

    /// Fetches and stores a single ticker outside the configured list.
    pub async fn add_ticker(&mut self, ticker: &str) -> Result<RunSummary> {
        let ticker = ticker.trim().to_uppercase();
        let Some(raw) = self.ingestion.fetch_stock(&ticker).await else {
            bail!("no data found for {ticker}");
        };

        let summary = self.process(&raw)?;
        tracing::info!(ticker = %ticker, ?summary, "ticker added");
        Ok(summary)
    }

    fn process(&mut self, raw: &[RawRecord]) -> Result<RunSummary> {
        let mut summary = RunSummary {
            fetched: raw.len(),
            ..RunSummary::default()
        };

        summary.raw_inserted = self.db.save_raw(raw).context("saving raw snapshot")?;

        let (cleaned, stats) = self.cleaner.clean(raw);
        summary.cleaned = stats.output;
        summary.duplicates = stats.duplicates;
        summary.dropped = stats.bad_dates + stats.missing_close;
        summary.forward_filled = stats.forward_filled;

        let (valid, rejected) = Validator::today().validate(&cleaned);
        summary.valid = valid.len();
        summary.rejected = rejected.len();
        if !rejected.is_empty() {
            let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            let path = self.config.rejected_export_path(&stamp);
            match export_rejected(&path, &rejected) {
                Ok(()) => tracing::info!(
                    path = %path.display(),
                    rows = rejected.len(),
                    "rejected records exported"
                ),
                Err(e) => tracing::warn!(error = %e, "could not export rejected records"),
            }
        }

        let processed = self.transformer.transform(&valid);
        summary.processed = processed.len();
        summary.processed_inserted = self
            .db
            .save_processed(&processed)
            .context("saving processed records")?;

        Ok(summary)
    }

    /// Runs once a day at the configured local time until Ctrl-C.
    ///
    /// A failed run is logged and the scheduler waits for the next slot.
    ///
    /// # Errors
    /// Returns an error only if the configured schedule time is invalid
    pub async fn run_daily(&mut self) -> Result<()> {
        let (hour, minute) = (self.config.schedule_hour, self.config.schedule_minute);
        let at = NaiveTime::from_hms_opt(hour, minute, 0)
            .with_context(|| format!("invalid schedule time {hour}:{minute:02}"))?;
        tracing::info!("scheduler started, pipeline runs daily at {hour}:{minute:02} local time");

        let until_next_run = move || {
            let now = Local::now().naive_local();
            let next = next_run_after(now, at);
            tracing::info!(%next, "waiting for next run");
            (next - now).to_std().unwrap_or_default()
        };
        self.run_scheduled(until_next_run, tokio::signal::ctrl_c()).await;
        Ok(())
    }

    /// Repeatedly sleeps for `until_next_run()` and then runs the pipeline,
    /// until `shutdown` completes.
    ///
    /// `shutdown` is polled while sleeping and while a run is in flight, so a
    /// stop request is honored at any point. An interrupted run leaves only
    /// rows already committed by earlier stages.
    pub async fn run_scheduled<W, S>(&mut self, mut until_next_run: W, shutdown: S)
    where
        W: FnMut() -> Duration,
        S: Future,
    {
        tokio::pin!(shutdown);

        loop {
            let wait = until_next_run();
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(wait) => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::warn!("run interrupted by shutdown");
                    break;
                }
                result = self.run() => {
                    if let Err(e) = result {
                        tracing::error!(error = %format!("{e:#}"), "pipeline failed");
                    }
                }
            }
        }

        tracing::info!("scheduler stopped");
    }
}

/// Next occurrence of `at` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Writes rejected rows, with their reasons, to a CSV file for audit.
pub fn export_rejected(path: &Path, rejected: &[RejectedRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "date",
        "ticker",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "rejection_reason",
    ])?;

    let cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for r in rejected {
        let record = &r.record;
        writer.write_record([
            record.date.to_string(),
            record.ticker.clone(),
            cell(record.open),
            cell(record.high),
            cell(record.low),
            record.close.to_string(),
            record.volume.map(|v| v.to_string()).unwrap_or_default(),
            r.rejection_reason(),
        ])?;
    }
    writer.flush()?;

    Ok(())
}
