use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_TICKERS: &[&str] = &["RELIANCE.NS", "TCS.NS", "INFY.NS", "HDFCBANK.NS", "WIPRO.NS"];

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub tickers: Vec<String>,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    /// Daily run time, local clock.
    pub schedule_hour: u32,
    pub schedule_minute: u32,
    /// How far back to fetch, e.g. `6mo`.
    pub period: String,
    /// Candle size, e.g. `1d`.
    pub interval: String,
    pub fetch_timeout: Duration,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tickers = match get("PIPELINE_TICKERS") {
            Some(list) => list
                .split(',')
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
            None => DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
        };

        let database_url =
            get("DATABASE_URL").unwrap_or_else(|| "sqlite:///stock_pipeline.db".to_string());

        let config = Self {
            tickers,
            database_path: database_path(&database_url)?,
            log_dir: PathBuf::from(get("LOG_DIR").unwrap_or_else(|| "logs".to_string())),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            schedule_hour: parse_or(&get, "SCHEDULE_HOUR", 16)?,
            schedule_minute: parse_or(&get, "SCHEDULE_MINUTE", 5)?,
            period: get("HISTORICAL_PERIOD").unwrap_or_else(|| "6mo".to_string()),
            interval: get("INTERVAL").unwrap_or_else(|| "1d".to_string()),
            fetch_timeout: Duration::from_secs(parse_or(&get, "FETCH_TIMEOUT_SECS", 30)?),
        };

        if config.schedule_hour > 23 || config.schedule_minute > 59 {
            bail!(
                "invalid schedule time {}:{:02}",
                config.schedule_hour,
                config.schedule_minute
            );
        }
        if config.tickers.is_empty() {
            bail!("PIPELINE_TICKERS must name at least one ticker");
        }

        Ok(config)
    }

    /// Path of the rejected-records export for a run started at `stamp`.
    pub fn rejected_export_path(&self, stamp: &str) -> PathBuf {
        self.log_dir.join(format!("rejected_{stamp}.csv"))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {v:?}")),
        None => Ok(default),
    }
}

/// Accepts either a bare path or a `sqlite://` URL.
fn database_path(url: &str) -> Result<PathBuf> {
    let path = match url.strip_prefix("sqlite://") {
        Some(rest) => rest.strip_prefix('/').unwrap_or(rest),
        None if url.contains("://") => bail!("only SQLite databases are supported, got {url}"),
        None => url,
    };
    if path.is_empty() {
        bail!("DATABASE_URL has no path: {url}");
    }
    Ok(PathBuf::from(path))
}
