mod config;
mod models;
mod pipeline;
mod scraper;
mod storage;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::scraper::ProgressSink;
use crate::storage::PriceCache;

#[derive(Parser)]
#[command(name = "jpfund-etl", about = "Yahoo Finance Japan price history ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Cache directory override
    #[arg(long, global = true, env = "JPFUND_CACHE__DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh price history for the given instrument codes
    Fetch {
        /// Fund association codes or stock tickers (e.g. 0331418A 7203.T AAPL)
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Print the history for one instrument (cached when fresh)
    Show {
        code: String,

        /// Also look up and print the display name
        #[arg(short, long)]
        name: bool,
    },

    /// Diagnose what the fund pages currently serve for a code
    Probe { code: String },

    /// Show cache statistics
    Stats,

    /// Delete all cached price files
    ClearCache,
}

/// Forwards fetch progress lines to the log.
struct LogSink;

impl ProgressSink for LogSink {
    fn status(&self, message: &str) {
        info!("{}", message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "jpfund_etl=info,warn",
        1 => "jpfund_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(dir) = cli.cache_dir {
        config.cache.dir = dir;
    }

    match cli.command {
        Command::Fetch { codes } => {
            let pipeline = Pipeline::new(&config)?;
            let stats = pipeline.run(&codes, &LogSink).await;
            println!(
                "Done: {}/{} instruments with data, {} points, {:.1}s",
                stats.with_data,
                stats.instruments,
                stats.points,
                stats.elapsed.as_secs_f64(),
            );
        }

        Command::Show { code, name } => {
            let pipeline = Pipeline::new(&config)?;
            let series = pipeline.history_for(&code, &LogSink).await;

            if name {
                match pipeline.scraper().fetch_display_name(&code).await {
                    Some(display) => println!("{} ({})", display, code),
                    None => println!("{} (name unavailable)", code),
                }
            }

            if series.is_empty() {
                println!("{}: no price data available", code);
            } else {
                for point in series.points() {
                    println!("{}  {:>12.2}", point.date, point.close);
                }
                println!("─────────────────────────────────");
                println!(
                    "  {} points | {} → {} | {} days",
                    series.len(),
                    series.first().map(|p| p.date.to_string()).unwrap_or_default(),
                    series.last().map(|p| p.date.to_string()).unwrap_or_default(),
                    series.span_days(),
                );
            }
        }

        Command::Probe { code } => {
            let pipeline = Pipeline::new(&config)?;
            let report = pipeline.scraper().probe(&code).await;

            println!("─────────────────────────────────");
            println!("  Probe: {}", code);
            println!("─────────────────────────────────");
            println!(
                "  History table  : {}",
                report
                    .history_rows
                    .map(|n| format!("{} rows", n))
                    .unwrap_or_else(|| "not found".into())
            );
            println!(
                "  Embedded state : {}",
                if report.state_found { "present" } else { "absent" }
            );
            if !report.state_keys.is_empty() {
                println!("  State keys     : {}", report.state_keys.join(", "));
            }
            for (shape, rows) in &report.shape_rows {
                println!("    {:<12} : {} rows", shape, rows);
            }
            println!(
                "  Display name   : {}",
                report.display_name.as_deref().unwrap_or("unknown")
            );
            println!("─────────────────────────────────");
        }

        Command::Stats => {
            let cache = PriceCache::new(config.cache.dir.clone());
            let stats = cache.stats(Local::now().date_naive())?;
            println!("─────────────────────────────────");
            println!("  jpfund ETL — Cache Stats");
            println!("─────────────────────────────────");
            println!("  Entries  : {}", stats.entries);
            println!("  Fresh    : {}", stats.fresh);
            println!("  Points   : {}", stats.points);
            println!(
                "  From     : {}",
                stats.earliest.map(|d| d.to_string()).unwrap_or("—".into())
            );
            println!(
                "  To       : {}",
                stats.latest.map(|d| d.to_string()).unwrap_or("—".into())
            );
            println!("─────────────────────────────────");
        }

        Command::ClearCache => {
            let cache = PriceCache::new(config.cache.dir.clone());
            let removed = cache.clear()?;
            println!("Removed {} cache entries from {:?}", removed, config.cache.dir);
        }
    }

    Ok(())
}
