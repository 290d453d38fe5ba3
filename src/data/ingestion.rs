use super::{RawRecord, RawValue};
use crate::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde_json::Value;
use std::time::Duration;

/// A source of daily OHLCV candles, queried one instrument at a time.
///
/// `Ok(None)` means the source does not know the instrument or has no data
/// for the requested window; callers treat it the same as an empty result.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> Result<Option<Vec<RawRecord>>, FetchError>;
}

/// Yahoo Finance v8 chart endpoint.
pub struct YahooFinance {
    client: reqwest::Client,
    base_url: String,
}

impl YahooFinance {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_base_url("https://query1.finance.yahoo.com", timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataSource for YahooFinance {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> Result<Option<Vec<RawRecord>>, FetchError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval={}",
            self.base_url, ticker, period, interval
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                source_name: self.name(),
                ticker: ticker.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.json::<Value>().await?;
        parse_chart_response(ticker, &body, Utc::now())
    }
}

/// Converts a v8 chart payload into raw records.
///
/// Dates are rendered as RFC 3339 timestamps in the exchange's own UTC offset,
/// leaving calendar-date normalization to the cleaner.
pub fn parse_chart_response(
    ticker: &str,
    body: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<Option<Vec<RawRecord>>, FetchError> {
    let malformed = |message: &str| FetchError::Malformed {
        ticker: ticker.to_string(),
        message: message.to_string(),
    };

    let result = &body["chart"]["result"][0];
    if result.is_null() {
        return Ok(None);
    }

    let timestamps = match result["timestamp"].as_array() {
        Some(ts) if !ts.is_empty() => ts,
        _ => return Ok(None),
    };

    let offset = result["meta"]["gmtoffset"]
        .as_i64()
        .and_then(|secs| FixedOffset::east_opt(secs as i32))
        .unwrap_or_else(|| Utc.fix());

    let quote = &result["indicators"]["quote"][0];
    if !quote.is_object() {
        return Err(malformed("missing indicators.quote"));
    }

    let cell = |field: &str, i: usize| -> RawValue {
        quote[field]
            .as_array()
            .and_then(|values| values.get(i))
            .map_or(RawValue::Missing, RawValue::from_json)
    };

    let mut records = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let secs = ts
            .as_i64()
            .ok_or_else(|| malformed("non-integer timestamp"))?;
        let date = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| malformed("timestamp out of range"))?
            .with_timezone(&offset);

        records.push(RawRecord {
            date: date.to_rfc3339(),
            ticker: ticker.to_string(),
            open: cell("open", i),
            high: cell("high", i),
            low: cell("low", i),
            close: cell("close", i),
            volume: cell("volume", i),
            fetched_at: Some(fetched_at),
        });
    }

    Ok(Some(records))
}

/// Fetches a batch of instruments from a single source.
///
/// One instrument failing never aborts the batch: errors and empty results
/// are logged and that instrument is skipped.
pub struct DataIngestion {
    source: Box<dyn MarketDataSource>,
    period: String,
    interval: String,
}

impl DataIngestion {
    pub fn new(source: Box<dyn MarketDataSource>, period: &str, interval: &str) -> Self {
        Self {
            source,
            period: period.to_string(),
            interval: interval.to_string(),
        }
    }

    /// Fetches one instrument, mapping "not found" and "empty" to `None`.
    pub async fn fetch_stock(&self, ticker: &str) -> Option<Vec<RawRecord>> {
        tracing::info!(ticker, source = self.source.name(), "fetching");

        match self.source.fetch(ticker, &self.period, &self.interval).await {
            Ok(Some(records)) if !records.is_empty() => {
                tracing::info!(ticker, rows = records.len(), "fetched");
                Some(records)
            }
            Ok(_) => {
                tracing::warn!(ticker, "no data returned");
                None
            }
            Err(e) => {
                tracing::error!(ticker, error = %e, "fetch failed");
                None
            }
        }
    }

    /// Fetches every ticker in order and concatenates the results.
    ///
    /// # Arguments
    /// * `tickers`: Symbols to fetch, e.g. `["TCS.NS", "INFY.NS"]`
    ///
    /// # Returns
    /// All rows from the tickers that yielded data; empty if none did
    pub async fn fetch_all(&self, tickers: &[String]) -> Vec<RawRecord> {
        tracing::info!(count = tickers.len(), ?tickers, "starting fetch");

        let mut combined = Vec::new();
        let mut succeeded = 0usize;
        for ticker in tickers {
            if let Some(records) = self.fetch_stock(ticker).await {
                succeeded += 1;
                combined.extend(records);
            }
        }

        if succeeded == 0 {
            tracing::error!("no data fetched for any ticker");
        } else {
            tracing::info!(
                rows = combined.len(),
                tickers = succeeded,
                skipped = tickers.len() - succeeded,
                "fetch complete"
            );
        }

        combined
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{raw, Canned, StaticSource};
    use super::*;
    use serde_json::json;

    fn chart_body() -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": { "symbol": "TCS.NS", "gmtoffset": 19800 },
                    "timestamp": [1704166200, 1704252600],
                    "indicators": {
                        "quote": [{
                            "open": [3700.0, null],
                            "high": [3750.5, 3790.0],
                            "low": [3690.0, 3720.0],
                            "close": [3740.25, 3780.0],
                            "volume": [1500000, 1300000]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_parse_chart_response() {
        let records = parse_chart_response("TCS.NS", &chart_body(), Utc::now())
            .unwrap()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, "2024-01-02T09:00:00+05:30");
        assert_eq!(records[0].close, RawValue::Number(3740.25));
        assert_eq!(records[1].open, RawValue::Missing);
        assert_eq!(records[1].volume, RawValue::Number(1_300_000.0));
        assert!(records.iter().all(|r| r.fetched_at.is_some()));
    }

    #[test]
    fn test_parse_chart_response_not_found() {
        let body = json!({
            "chart": {
                "result": null,
                "error": { "code": "Not Found", "description": "No data found" }
            }
        });
        assert!(parse_chart_response("NOPE", &body, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_parse_chart_response_without_quotes_is_malformed() {
        let body = json!({
            "chart": { "result": [{ "meta": {}, "timestamp": [1704166200], "indicators": {} }] }
        });
        assert!(matches!(
            parse_chart_response("X", &body, Utc::now()),
            Err(FetchError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_all_skips_failed_tickers() {
        let source = StaticSource::default()
            .with("AAA", Canned::Data(vec![raw("2024-01-02", "AAA", 10.0)]))
            .with("BBB", Canned::Fail)
            .with("CCC", Canned::NotFound)
            .with("DDD", Canned::Data(Vec::new()))
            .with("EEE", Canned::Data(vec![raw("2024-01-02", "EEE", 20.0)]));
        let ingestion = DataIngestion::new(Box::new(source), "6mo", "1d");

        let tickers: Vec<String> = ["AAA", "BBB", "CCC", "DDD", "EEE"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let records = ingestion.fetch_all(&tickers).await;

        let fetched: Vec<&str> = records.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(fetched, vec!["AAA", "EEE"]);
    }

    #[tokio::test]
    async fn test_fetch_stock_treats_empty_as_missing() {
        let source = StaticSource::default().with("DDD", Canned::Data(Vec::new()));
        let ingestion = DataIngestion::new(Box::new(source), "6mo", "1d");
        assert!(ingestion.fetch_stock("DDD").await.is_none());
    }
}
