use thiserror::Error;

/// Failure fetching one instrument from a market data source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{source_name} returned HTTP {status} for {ticker}")]
    Status {
        source_name: &'static str,
        ticker: String,
        status: u16,
    },

    #[error("malformed response for {ticker}: {message}")]
    Malformed { ticker: String, message: String },
}

/// Failure reading from or writing to the pipeline database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
