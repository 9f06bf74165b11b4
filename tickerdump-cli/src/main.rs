//! tickerdump CLI: fetch, inspect and configure per-symbol market data dumps.
//!
//! Commands:
//! - `fetch`: fetch metadata + full history for each symbol into an existing directory
//! - `status`: report which dumps exist, their row counts and date ranges
//! - `universe init`: write the built-in fund list as an editable universe TOML

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tickerdump_core::data::{
    scan, BatchError, BatchFetcher, FailurePolicy, Period, RateLimitConfig, StdoutProgress,
    Universe, YahooProvider,
};
use tickerdump_core::FetchConfig;
use tracing_subscriber::EnvFilter;

/// Exit status when the output directory does not exist.
const EXIT_OUTPUT_DIR_MISSING: i32 = 2;
/// Exit status when any symbol failed or the batch was aborted.
const EXIT_FAILURES: i32 = 1;

#[derive(Parser)]
#[command(
    name = "tickerdump",
    version,
    about = "Dump ticker metadata and price history to JSON/CSV"
)]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch metadata and daily history for each symbol.
    Fetch(FetchArgs),
    /// Report the dumps present in an output directory.
    Status {
        /// Output directory. Defaults to the config value or ./data/yf.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// TOML config file to take the output directory from.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Universe file management.
    Universe {
        #[command(subcommand)]
        action: UniverseAction,
    },
}

#[derive(clap::Args)]
struct FetchArgs {
    /// Symbols to fetch (e.g., VOO VTI BND). Overrides config and universe.
    #[arg(env = "TICKERDUMP_SYMBOLS", value_delimiter = ',')]
    symbols: Vec<String>,

    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Universe TOML to take symbols from when none are given.
    #[arg(long)]
    universe: Option<PathBuf>,

    /// Only fetch this sector of the universe.
    #[arg(long, requires = "universe")]
    sector: Option<String>,

    /// Output directory. Must already exist.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// History lookback: 1d 5d 1mo 3mo 6mo 1y 2y 5y 10y ytd max.
    #[arg(long)]
    period: Option<Period>,

    /// Keep raw prices instead of adjusting OHLC for splits and dividends.
    #[arg(long, default_value_t = false)]
    no_adjust: bool,

    /// Stop at the first failing symbol.
    #[arg(long, default_value_t = false)]
    fail_fast: bool,

    /// Pacing strategy between symbols.
    #[arg(long, value_enum)]
    rate_limit: Option<RateLimitKind>,

    /// Seconds between symbols (fixed), initial delay (adaptive) or seconds per token (token-bucket).
    #[arg(long)]
    delay_secs: Option<f64>,
}

#[derive(Subcommand)]
enum UniverseAction {
    /// Write the built-in ETF universe to a TOML file.
    Init {
        /// Destination path.
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RateLimitKind {
    Fixed,
    TokenBucket,
    Adaptive,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tickerdump starting");

    let result = match cli.command {
        Commands::Fetch(args) => run_fetch(args),
        Commands::Status { output_dir, config } => {
            let config = load_config(config.as_deref())?;
            run_status(output_dir.as_deref().unwrap_or(&config.output_dir))
        }
        Commands::Universe { action } => match action {
            UniverseAction::Init { path, force } => run_universe_init(&path, force),
        },
    };

    if let Err(err) = &result {
        if let Some(BatchError::OutputDirMissing { path }) = err.downcast_ref() {
            eprintln!(
                "Output directory does not exist: {} (create it first)",
                path.display()
            );
            std::process::exit(EXIT_OUTPUT_DIR_MISSING);
        }
    }
    result
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,tickerdump={level},tickerdump_core={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<FetchConfig> {
    match path {
        Some(path) => FetchConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(FetchConfig::default()),
    }
}

fn run_fetch(args: FetchArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(period) = args.period {
        config.period = period;
    }
    if args.no_adjust {
        config.auto_adjust = false;
    }
    if args.fail_fast {
        config.failure_policy = FailurePolicy::Abort;
    }
    config.rate_limit = override_rate_limit(&config.rate_limit, args.rate_limit, args.delay_secs);

    let universe = args
        .universe
        .as_deref()
        .map(Universe::from_file)
        .transpose()
        .context("loading universe")?;
    let symbols = config.resolve_symbols(&args.symbols, universe.as_ref(), args.sector.as_deref())?;
    if symbols.is_empty() {
        bail!("no symbols to fetch");
    }

    let pacer = config.pacer().context("building rate limiter")?;
    let circuit_breaker = Arc::new(config.circuit_breaker());
    let provider = YahooProvider::with_config(circuit_breaker, config.yahoo_config())?;

    tracing::info!(
        symbols = symbols.len(),
        output_dir = %config.output_dir.display(),
        "fetching"
    );

    let mut fetcher = BatchFetcher::new(&provider, pacer, config.batch_options());
    let summary = match fetcher.run(&symbols, &config.output_dir, &StdoutProgress) {
        Ok(summary) => summary,
        Err(BatchError::Aborted { symbol, summary }) => {
            match summary.error_for(&symbol) {
                Some(err) => eprintln!("Aborted at {symbol}: {err}"),
                None => eprintln!("Aborted at {symbol}"),
            }
            std::process::exit(EXIT_FAILURES);
        }
        Err(err) => return Err(err.into()),
    };

    if !summary.all_succeeded() {
        for (sym, err) in summary.failures() {
            eprintln!("Error for {sym}: {err}");
        }
        std::process::exit(EXIT_FAILURES);
    }

    Ok(())
}

/// Apply `--rate-limit` / `--delay-secs` on top of the configured strategy.
fn override_rate_limit(
    current: &RateLimitConfig,
    kind: Option<RateLimitKind>,
    delay_secs: Option<f64>,
) -> RateLimitConfig {
    let configured = match current {
        RateLimitConfig::FixedDelay { .. } => RateLimitKind::Fixed,
        RateLimitConfig::TokenBucket { .. } => RateLimitKind::TokenBucket,
        RateLimitConfig::Adaptive { .. } => RateLimitKind::Adaptive,
    };
    let kind = kind.unwrap_or(configured);
    // Naming the configured strategy without a delay changes nothing.
    if delay_secs.is_none() && kind == configured {
        return current.clone();
    }
    let delay = delay_secs.unwrap_or(tickerdump_core::data::rate_limit::DEFAULT_DELAY_SECS);

    match (kind, current) {
        (RateLimitKind::Fixed, _) => RateLimitConfig::FixedDelay { delay_secs: delay },
        (RateLimitKind::TokenBucket, RateLimitConfig::TokenBucket { capacity, .. }) => {
            RateLimitConfig::TokenBucket {
                capacity: *capacity,
                refill_per_sec: 1.0 / delay,
            }
        }
        (RateLimitKind::TokenBucket, _) => RateLimitConfig::TokenBucket {
            capacity: 1,
            refill_per_sec: 1.0 / delay,
        },
        (
            RateLimitKind::Adaptive,
            RateLimitConfig::Adaptive {
                max_delay_secs,
                backoff_factor,
                jitter_percent,
                ..
            },
        ) => RateLimitConfig::Adaptive {
            base_delay_secs: delay,
            max_delay_secs: *max_delay_secs,
            backoff_factor: *backoff_factor,
            jitter_percent: *jitter_percent,
        },
        (RateLimitKind::Adaptive, _) => RateLimitConfig::Adaptive {
            base_delay_secs: delay,
            max_delay_secs: 120.0,
            backoff_factor: 2.0,
            jitter_percent: 0,
        },
    }
}

fn run_status(output_dir: &Path) -> Result<()> {
    if !output_dir.is_dir() {
        return Err(BatchError::OutputDirMissing {
            path: output_dir.to_path_buf(),
        }
        .into());
    }

    let entries = scan(output_dir).context("scanning output directory")?;
    if entries.is_empty() {
        println!("No dumps in: {}", output_dir.display());
        return Ok(());
    }

    let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();
    let complete = entries.iter().filter(|e| e.is_complete()).count();

    println!("Output: {}", output_dir.display());
    println!("Symbols: {} ({complete} complete)", entries.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<8} {:<6} {:<25} {:>8} {:>10}  {}",
        "Symbol", "Files", "Date Range", "Rows", "Size", "Name"
    );
    println!("{}", "-".repeat(80));
    for entry in &entries {
        let files = match (entry.has_json, entry.has_csv) {
            (true, true) => "both",
            (true, false) => "json",
            (false, true) => "csv",
            (false, false) => "-",
        };
        let range = match (entry.first_date, entry.last_date) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => "(no history)".into(),
        };
        let name = match (&entry.problem, &entry.name) {
            (Some(problem), _) => format!("ERROR: {problem}"),
            (None, _) if !entry.chronological => "WARNING: dates out of order".into(),
            (None, Some(name)) => name.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{:<8} {:<6} {:<25} {:>8} {:>10}  {}",
            entry.symbol,
            files,
            range,
            entry.row_count,
            format_size(entry.size_bytes),
            name
        );
    }

    Ok(())
}

fn run_universe_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        );
    }
    let universe = Universe::default_etfs();
    std::fs::write(path, universe.to_toml()?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!(
        "Wrote {} tickers in {} sectors to {}",
        universe.ticker_count(),
        universe.sector_names().len(),
        path.display()
    );
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
