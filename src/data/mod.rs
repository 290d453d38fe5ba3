pub mod ingestion;
pub mod models;

pub use ingestion::{DataIngestion, MarketDataSource, YahooFinance};
pub use models::{
    parse_calendar_date, round4, OhlcvRecord, ProcessedRecord, RawRecord, RawValue,
    RejectedRecord, Violation,
};
