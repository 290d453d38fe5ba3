mod config;
mod data;
mod error;
mod logging;
mod pipeline;
mod processing;
mod report;
mod storage;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use data::{DataIngestion, MarketDataSource, YahooFinance};
use pipeline::{Pipeline, RunSummary};
use storage::Database;

#[derive(Parser)]
#[command(name = "stock-pipeline", about = "Daily equity OHLCV ETL pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline once, immediately
    Run,
    /// Run the pipeline every day at SCHEDULE_HOUR:SCHEDULE_MINUTE (default)
    Schedule,
    /// Fetch, process and store a single ticker
    Add { ticker: String },
    /// Show stored processed data
    Show {
        #[arg(long)]
        ticker: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Emit rows as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    db.init_schema()?;
    Ok(db)
}

fn build_pipeline(config: Config) -> anyhow::Result<Pipeline> {
    let db = open_database(&config)?;
    let source: Box<dyn MarketDataSource> = Box::new(YahooFinance::new(config.fetch_timeout)?);
    let ingestion = DataIngestion::new(source, &config.period, &config.interval);
    Ok(Pipeline::new(config, ingestion, db))
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun Summary:");
    println!("Fetched rows: {}", summary.fetched);
    println!("New raw rows: {}", summary.raw_inserted);
    println!(
        "Cleaned rows: {} ({} duplicates, {} dropped, {} fields filled)",
        summary.cleaned, summary.duplicates, summary.dropped, summary.forward_filled
    );
    println!("Valid / Rejected: {} / {}", summary.valid, summary.rejected);
    println!(
        "Processed rows: {} ({} new)",
        summary.processed, summary.processed_inserted
    );
}

fn show(
    config: &Config,
    ticker: Option<&str>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let ticker = ticker.map(str::to_uppercase);
    let records = report::filter_range(db.load_processed(ticker.as_deref())?, from, to);

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        let stored = db.tickers()?;
        if stored.is_empty() {
            println!("No data yet. Run `stock-pipeline run` to load data.");
        } else {
            println!("No rows match. Stored tickers: {}", stored.join(", "));
        }
        return Ok(());
    }

    println!("Stored raw rows: {}", db.raw_count()?);
    for snapshot in report::snapshots(&records) {
        report::print_snapshot(&snapshot);
    }
    report::print_table(&records);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    logging::init(&config.log_dir, &config.log_level)?;

    match cli.command.unwrap_or(Command::Schedule) {
        Command::Run => {
            let mut pipeline = build_pipeline(config)?;
            let summary = pipeline.run().await.map_err(|e| {
                tracing::error!(error = %format!("{e:#}"), "pipeline failed");
                e
            })?;
            print_summary(&summary);
        }
        Command::Schedule => {
            let mut pipeline = build_pipeline(config)?;
            tracing::info!("run `stock-pipeline run` to trigger immediately");
            pipeline.run_daily().await?;
        }
        Command::Add { ticker } => {
            let mut pipeline = build_pipeline(config)?;
            let summary = pipeline.add_ticker(&ticker).await?;
            print_summary(&summary);
            println!("Tracked tickers: {}", pipeline.database().tickers()?.join(", "));
        }
        Command::Show {
            ticker,
            from,
            to,
            json,
        } => show(&config, ticker.as_deref(), from, to, json)?,
    }

    Ok(())
}
