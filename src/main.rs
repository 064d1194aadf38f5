use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cvd_breakout::{
    config::StrategyConfig,
    report::{EventSink, JsonLinesSink, RunSummary, TextSink, DEFAULT_TIMEZONE},
    runner,
    source::{
        find_trade_files, historical::DEFAULT_DATASET, CsvTradeSource, DatabentoParams,
        DatabentoSource, TradeSource,
    },
    trading_core::{ColorMode, SignalEngine},
};

#[derive(Parser, Debug)]
#[command(name = "cvd-breakout")]
#[command(about = "CVD trendline breakout signals on CME futures trades")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// JSON strategy config; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bars per trendline window
    #[arg(long, global = true)]
    window_size: Option<usize>,

    /// Target distance as a multiple of stop distance
    #[arg(long, global = true)]
    r_multiple: Option<f64>,

    /// Breakout tolerance as a fraction of the line value (0.001 = 0.1%)
    #[arg(long, global = true)]
    tolerance: Option<f64>,

    /// Color bars by close vs open only
    #[arg(long, global = true)]
    simple_colors: bool,

    /// Allow a same-direction entry right after a position closes
    #[arg(long, global = true)]
    reset_reversal_on_exit: bool,

    /// IANA timezone for displayed bar times
    #[arg(long, global = true)]
    tz: Option<String>,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream historical trades from Databento
    Fetch {
        /// Databento API key
        #[arg(long, env = "DATABENTO_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Raw contract symbol
        #[arg(short, long, default_value = "MESM5")]
        symbol: String,

        #[arg(long, default_value = DEFAULT_DATASET)]
        dataset: String,

        /// Start time (RFC 3339, e.g. 2025-05-05T13:30:00Z)
        #[arg(long)]
        start: String,

        /// End time (RFC 3339, exclusive)
        #[arg(long)]
        end: String,

        /// Request window size in minutes
        #[arg(long, default_value = "5")]
        page_minutes: i64,
    },

    /// Replay trades from a Databento CSV export (.csv or .csv.zst, file or directory)
    Replay {
        #[arg(short, long)]
        file: PathBuf,

        /// Keep only this raw symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Only files whose name contains this (e.g. YYYYMMDD), when reading a directory
        #[arg(short = 'D', long)]
        date: Option<String>,

        /// Start time (RFC 3339)
        #[arg(long)]
        start: Option<String>,

        /// End time (RFC 3339, exclusive)
        #[arg(long)]
        end: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "cvd_breakout=debug" } else { "cvd_breakout=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(default_level.parse()?)
                .add_directive("databento=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = strategy_config(&args)?;
    let tz: Tz = match &args.tz {
        Some(name) => name.parse().map_err(|e| anyhow!("Invalid timezone {}: {}", name, e))?,
        None => DEFAULT_TIMEZONE,
    };

    let summary = match &args.command {
        Commands::Fetch { api_key, symbol, dataset, start, end, page_minutes } => {
            if *page_minutes <= 0 {
                bail!("--page-minutes must be positive");
            }
            let params = DatabentoParams {
                dataset: dataset.clone(),
                symbol: symbol.clone(),
                start: parse_offset_time(start)?,
                end: parse_offset_time(end)?,
                page: time::Duration::minutes(*page_minutes),
            };
            info!("Streaming 1-min {} bars with CVD trendline breakouts", symbol);
            let mut source = DatabentoSource::new(api_key, params)?;
            execute(&mut source, config, tz, args.json).await?
        }
        Commands::Replay { file, symbol, date, start, end } => {
            let files = if file.is_dir() {
                find_trade_files(file, date.as_deref())?
            } else {
                vec![file.clone()]
            };
            if files.is_empty() {
                bail!("No trade files found in {:?}", file);
            }
            info!("Replaying {} file(s)", files.len());

            let mut source = CsvTradeSource::new(files).with_range(
                start.as_deref().map(parse_utc_time).transpose()?,
                end.as_deref().map(parse_utc_time).transpose()?,
            );
            if let Some(symbol) = symbol {
                source = source.with_symbol(symbol.clone());
            }
            execute(&mut source, config, tz, args.json).await?
        }
    };

    if !args.json {
        print_summary(&summary);
    }

    Ok(())
}

fn strategy_config(args: &Args) -> Result<StrategyConfig> {
    let mut config = match &args.config {
        Some(path) => StrategyConfig::from_json_file(path)?,
        None => StrategyConfig::default(),
    };
    if let Some(window_size) = args.window_size {
        config.window_size = window_size;
    }
    if let Some(r_multiple) = args.r_multiple {
        config.r_multiple = r_multiple;
    }
    if let Some(tolerance) = args.tolerance {
        config.breakout_tolerance = tolerance;
    }
    if args.simple_colors {
        config.color_mode = ColorMode::Simple;
    }
    if args.reset_reversal_on_exit {
        config.reset_reversal_on_exit = true;
    }
    config.validate()?;
    Ok(config)
}

async fn execute<S: TradeSource>(
    source: &mut S,
    config: StrategyConfig,
    tz: Tz,
    json: bool,
) -> Result<RunSummary> {
    let mut engine = SignalEngine::new(config);
    let stdout = std::io::stdout();

    if json {
        let mut sink = JsonLinesSink::new(stdout.lock());
        drive(source, &mut engine, &mut sink).await
    } else {
        let mut sink = TextSink::new(stdout.lock(), tz);
        drive(source, &mut engine, &mut sink).await
    }
}

async fn drive<S: TradeSource, K: EventSink>(
    source: &mut S,
    engine: &mut SignalEngine,
    sink: &mut K,
) -> Result<RunSummary> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    runner::run(source, engine, sink, shutdown).await
}

fn parse_offset_time(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("Invalid RFC 3339 time: {}", s))
}

fn parse_utc_time(s: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid RFC 3339 time: {}", s))?
        .with_timezone(&Utc);
    Ok(ts)
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "=".repeat(50));
    println!("RUN SUMMARY");
    println!("{}", "=".repeat(50));
    println!("Bars:         {}", summary.bars);
    println!("Entries:      {}", summary.entries);
    println!("Stop-losses:  {}", summary.stop_losses);
    println!("Take-profits: {}", summary.take_profits);
    println!("Vetoes:       {}", summary.total_vetoes());
    for (code, count) in &summary.vetoes {
        println!("  {:<30} {}", code, count);
    }
    if summary.skipped_records > 0 {
        println!("Skipped (no aggressor): {}", summary.skipped_records);
    }
}
