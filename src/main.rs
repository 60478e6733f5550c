//! `ma-backtester` CLI.
//!
//! Commands:
//! - `backtest`: run one MA crossover backtest over a CSV of daily bars
//! - `optimize`: grid-search (fast, slow) pairs for one symbol
//! - `compare`: rank an explicit list of pairs
//! - `cross-symbol`: optimize several symbols and find the best shared pair
//!
//! Results are printed to stdout as JSON. Logs go to stderr (`RUST_LOG`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ma_backtester::data::loader;
use ma_backtester::engine::optimizer::build_heatmap;
use ma_backtester::errors::AppError;
use ma_backtester::models::config::{BacktestConfig, MaType, OptimizationConfig, PeriodRange};
use ma_backtester::models::result::{HeatmapMetric, OptimizationResult};
use ma_backtester::utils::export;
use ma_backtester::BacktestService;

#[derive(Parser)]
#[command(
    name = "ma-backtester",
    about = "Moving-average crossover backtester with ATR trailing stops"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest.
    Backtest {
        /// CSV file with date,open,high,low,close[,volume].
        csv: PathBuf,

        /// Symbol name. Defaults to the file name.
        #[arg(long)]
        symbol: Option<String>,

        /// JSON backtest config; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Fast MA period.
        #[arg(long)]
        fast: Option<usize>,

        /// Slow MA period.
        #[arg(long)]
        slow: Option<usize>,

        #[command(flatten)]
        overrides: ConfigOverrides,

        /// Write trades.csv, metrics.csv and equity.csv here.
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Grid-search MA pairs for one symbol.
    Optimize {
        csv: PathBuf,

        #[arg(long)]
        symbol: Option<String>,

        #[command(flatten)]
        grid: GridArgs,

        /// Also emit a (fast, slow) heatmap: return, sharpe, win_rate, profit_factor.
        #[arg(long)]
        heatmap: Option<HeatmapMetric>,
    },
    /// Rank an explicit list of pairs.
    Compare {
        csv: PathBuf,

        #[arg(long)]
        symbol: Option<String>,

        /// Pair as "fast,slow". Repeat for each pair.
        #[arg(long = "pair", required = true, value_parser = parse_pair)]
        pairs: Vec<(usize, usize)>,

        /// JSON backtest config; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: ConfigOverrides,

        /// Give up after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write comparison.csv here.
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Optimize several symbols and aggregate pairs across them.
    CrossSymbol {
        /// One CSV per symbol; the file name is the symbol.
        #[arg(required = true)]
        csvs: Vec<PathBuf>,

        #[command(flatten)]
        grid: GridArgs,
    },
}

/// Settings shared by every command that runs the engine.
#[derive(Args)]
struct ConfigOverrides {
    /// Keep only the most recent N bars (0 = all).
    #[arg(long)]
    days: Option<usize>,

    #[arg(long)]
    initial_capital: Option<f64>,

    #[arg(long)]
    atr_period: Option<usize>,

    #[arg(long)]
    atr_multiplier: Option<f64>,

    /// ema or sma.
    #[arg(long)]
    ma_type: Option<MaType>,

    /// Percent of available capital per entry (0, 100].
    #[arg(long)]
    position_sizing: Option<f64>,

    /// Distance above the fast MA (percent) that raises an alert.
    #[arg(long)]
    mean_reversion_threshold: Option<f64>,
}

#[derive(Args)]
struct GridArgs {
    /// JSON optimization config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fast period range as "min,max".
    #[arg(long)]
    fast_range: Option<PeriodRange>,

    /// Slow period range as "min,max".
    #[arg(long)]
    slow_range: Option<PeriodRange>,

    #[arg(long)]
    min_distance: Option<usize>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Cancel the sweep after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Write ranked results as CSV here.
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut BacktestConfig) {
        if let Some(v) = self.days {
            config.days = v;
        }
        if let Some(v) = self.initial_capital {
            config.initial_capital = v;
        }
        if let Some(v) = self.atr_period {
            config.atr_period = v;
        }
        if let Some(v) = self.atr_multiplier {
            config.atr_multiplier = v;
        }
        if let Some(v) = self.ma_type {
            config.ma_type = v;
        }
        if let Some(v) = self.position_sizing {
            config.position_sizing_percentage = Some(v);
        }
        if let Some(v) = self.mean_reversion_threshold {
            config.mean_reversion_threshold = v;
        }
    }
}

impl GridArgs {
    fn to_config(&self) -> Result<OptimizationConfig> {
        let mut config: OptimizationConfig = read_config(self.config.as_deref())?;
        if let Some(r) = self.fast_range {
            config.fast_range = r;
        }
        if let Some(r) = self.slow_range {
            config.slow_range = r;
        }
        if let Some(d) = self.min_distance {
            config.min_distance = d;
        }
        self.overrides.apply(&mut config.backtest);
        Ok(config)
    }

    fn service(&self) -> BacktestService {
        service(self.timeout_secs)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ma_backtester::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest {
            csv,
            symbol,
            config,
            fast,
            slow,
            overrides,
            export_dir,
        } => {
            let mut cfg: BacktestConfig = read_config(config.as_deref())?;
            overrides.apply(&mut cfg);
            if let Some(f) = fast {
                cfg.fast_period = f;
            }
            if let Some(s) = slow {
                cfg.slow_period = s;
            }
            let symbol = symbol.unwrap_or_else(|| loader::symbol_from_path(&csv));
            let bars = loader::load_bars_csv(&csv)?;

            let results = BacktestService::new().run_backtest(symbol, bars, cfg).await?;

            if let Some(dir) = export_dir {
                ensure_dir(&dir)?;
                export::write_trades_csv(&results.trades, &dir.join("trades.csv"))?;
                export::write_equity_csv(&results.equity_curve, &dir.join("equity.csv"))?;
                if let Some(metrics) = &results.performance_metrics {
                    export::write_metrics_csv(metrics, &dir.join("metrics.csv"))?;
                }
            }
            print_json(&results)
        }
        Commands::Optimize {
            csv,
            symbol,
            grid,
            heatmap,
        } => {
            let config = grid.to_config()?;
            let symbol = symbol.unwrap_or_else(|| loader::symbol_from_path(&csv));
            let bars = loader::load_bars_csv(&csv)?;

            let summary = grid.service().optimize(symbol, bars, config).await?;

            if let Some(dir) = &grid.export_dir {
                export_rankings(dir, "optimization.csv", &summary.all_results)?;
            }
            match heatmap {
                Some(metric) => print_json(&serde_json::json!({
                    "summary": summary,
                    "heatmap": build_heatmap(&summary, metric),
                })),
                None => print_json(&summary),
            }
        }
        Commands::Compare {
            csv,
            symbol,
            pairs,
            config,
            overrides,
            timeout_secs,
            export_dir,
        } => {
            let mut cfg: BacktestConfig = read_config(config.as_deref())?;
            overrides.apply(&mut cfg);
            let symbol = symbol.unwrap_or_else(|| loader::symbol_from_path(&csv));
            let bars = loader::load_bars_csv(&csv)?;

            let results = service(timeout_secs)
                .compare_pairs(symbol, bars, pairs, cfg)
                .await?;

            if let Some(dir) = export_dir {
                export_rankings(&dir, "comparison.csv", &results)?;
            }
            print_json(&results)
        }
        Commands::CrossSymbol { csvs, grid } => {
            let config = grid.to_config()?;
            let universe = csvs
                .iter()
                .map(|p| loader::load_symbol(p))
                .collect::<Result<Vec<_>, AppError>>()?;

            let summary = grid.service().cross_symbol(universe, config).await?;

            if let Some(dir) = &grid.export_dir {
                for per_symbol in &summary.per_symbol_results {
                    let name = format!("{}_optimization.csv", per_symbol.symbol);
                    export_rankings(dir, &name, &per_symbol.all_results)?;
                }
            }
            print_json(&summary)
        }
    }
}

fn service(timeout_secs: Option<u64>) -> BacktestService {
    match timeout_secs {
        Some(secs) => BacktestService::new().with_timeout(Duration::from_secs(secs)),
        None => BacktestService::new(),
    }
}

fn parse_pair(s: &str) -> Result<(usize, usize), AppError> {
    s.parse::<PeriodRange>().map(|r| r.as_tuple())
}

/// Read a JSON config file, or fall back to defaults.
fn read_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))
}

fn export_rankings(dir: &Path, file_name: &str, results: &[OptimizationResult]) -> Result<()> {
    ensure_dir(dir)?;
    export::write_optimization_csv(results, &dir.join(file_name))?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
