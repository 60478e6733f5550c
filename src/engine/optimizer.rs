use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::data::validator::validate_bars;
use crate::errors::AppError;
use crate::models::bar::Bar;
use crate::models::config::{BacktestConfig, OptimizationConfig, PeriodRange};
use crate::models::result::{
    HeatmapCell, HeatmapData, HeatmapMetric, OptimizationResult, OptimizationSummary,
    SummaryStats, UniversalPairResult,
};

use super::executor::{run_with_series, window_bars};
use super::indicators::IndicatorCache;
use super::metrics::empty_metrics;

/// Number of ranked pairs reported alongside the best one.
pub const TOP_N: usize = 5;

// ══════════════════════════════════════════════════════════════
// Ranking
// ══════════════════════════════════════════════════════════════

/// Everything the ranking looks at, in priority order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankKey {
    pub total_return: f64,
    pub sharpe: f64,
    pub trades: f64,
    pub fast_period: usize,
    pub slow_period: usize,
}

impl RankKey {
    /// Return desc, Sharpe desc, trades asc, then fast asc and slow asc.
    /// Total over all inputs, so the order never depends on evaluation order.
    pub fn compare(&self, other: &Self) -> CmpOrdering {
        positive_zero(other.total_return)
            .total_cmp(&positive_zero(self.total_return))
            .then_with(|| positive_zero(other.sharpe).total_cmp(&positive_zero(self.sharpe)))
            .then_with(|| positive_zero(self.trades).total_cmp(&positive_zero(other.trades)))
            .then_with(|| self.fast_period.cmp(&other.fast_period))
            .then_with(|| self.slow_period.cmp(&other.slow_period))
    }
}

// -0.0 and 0.0 must tie under total_cmp.
fn positive_zero(x: f64) -> f64 {
    x + 0.0
}

/// Anything that can be ranked with [`RankKey::compare`].
pub trait Ranked {
    fn rank_key(&self) -> RankKey;
}

impl Ranked for OptimizationResult {
    fn rank_key(&self) -> RankKey {
        RankKey {
            total_return: self.metrics.total_return_percent,
            sharpe: self.metrics.sharpe_ratio,
            trades: self.metrics.total_trades as f64,
            fast_period: self.fast_period,
            slow_period: self.slow_period,
        }
    }
}

impl Ranked for UniversalPairResult {
    fn rank_key(&self) -> RankKey {
        RankKey {
            total_return: self.avg_return_percent,
            sharpe: self.avg_sharpe_ratio,
            trades: self.avg_total_trades,
            fast_period: self.fast_period,
            slow_period: self.slow_period,
        }
    }
}

/// Sort best-first.
pub fn rank<T: Ranked>(items: &mut [T]) {
    items.sort_by(|a, b| a.rank_key().compare(&b.rank_key()));
}

// ══════════════════════════════════════════════════════════════
// Grid search
// ══════════════════════════════════════════════════════════════

/// Every `(fast, slow)` with `fast < slow` and `slow - fast >= min_distance`.
pub fn generate_pairs(
    fast_range: PeriodRange,
    slow_range: PeriodRange,
    min_distance: usize,
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for fast in fast_range.values() {
        for slow in slow_range.values() {
            if slow > fast && slow - fast >= min_distance {
                pairs.push((fast, slow));
            }
        }
    }
    pairs
}

/// Grid-search the configured pair space for one symbol.
///
/// An empty candidate set is an `InvalidParameterRange` error. On cancellation
/// every partial result is dropped and `OptimizationCancelled` is returned.
pub fn optimize(
    symbol: &str,
    bars: &[Bar],
    config: &OptimizationConfig,
    cancel_flag: &AtomicBool,
) -> Result<OptimizationSummary, AppError> {
    config.validate()?;
    validate_bars(bars)?;

    let pairs = generate_pairs(config.fast_range, config.slow_range, config.min_distance);
    if pairs.is_empty() {
        return Err(AppError::InvalidParameterRange {
            fast_range: config.fast_range.as_tuple(),
            slow_range: config.slow_range.as_tuple(),
            min_distance: config.min_distance,
        });
    }

    let window = window_bars(bars, config.backtest.days);
    info!("Grid search for {}: {} pairs over {} bars", symbol, pairs.len(), window.len());

    let start = Instant::now();
    let mut results = evaluate_pairs(symbol, window, &pairs, &config.backtest, cancel_flag)?;
    rank(&mut results);

    info!(
        "Grid search for {} complete: {} pairs in {:.2}s",
        symbol,
        results.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(OptimizationSummary {
        symbol: symbol.to_string(),
        best_pair: results.first().cloned(),
        top_5_pairs: results.iter().take(TOP_N).cloned().collect(),
        total_pairs_tested: results.len(),
        summary_stats: summary_stats(&results),
        date_range: date_range(window),
        parameters_used: config.clone(),
        all_results: results,
        error: None,
    })
}

/// Evaluate and rank a caller-chosen list of pairs.
pub fn compare_pairs(
    symbol: &str,
    bars: &[Bar],
    pairs: &[(usize, usize)],
    config: &BacktestConfig,
    cancel_flag: &AtomicBool,
) -> Result<Vec<OptimizationResult>, AppError> {
    config.validate_common()?;
    validate_bars(bars)?;
    for &(fast, slow) in pairs {
        if fast == 0 || fast >= slow {
            return Err(AppError::InvalidPair { fast, slow });
        }
    }

    let window = window_bars(bars, config.days);
    info!("Comparing {} pairs for {}", pairs.len(), symbol);
    let mut results = evaluate_pairs(symbol, window, pairs, config, cancel_flag)?;
    rank(&mut results);
    Ok(results)
}

/// Run every pair in parallel over one window, sharing MA series through the cache.
fn evaluate_pairs(
    symbol: &str,
    window: &[Bar],
    pairs: &[(usize, usize)],
    base: &BacktestConfig,
    cancel_flag: &AtomicBool,
) -> Result<Vec<OptimizationResult>, AppError> {
    let cache = IndicatorCache::new(window, base.atr_period)?;
    let counter = AtomicUsize::new(0);
    let total = pairs.len();

    let results = pairs
        .par_iter()
        .map(|&(fast, slow)| {
            if cancel_flag.load(Ordering::Relaxed) {
                return Err(AppError::OptimizationCancelled);
            }
            let result = evaluate_pair(symbol, window, &cache, fast, slow, base)?;
            let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 100 == 0 || done == total {
                debug!("{}: {}/{} pairs evaluated", symbol, done, total);
            }
            Ok(result)
        })
        .collect::<Result<Vec<_>, AppError>>();

    if cancel_flag.load(Ordering::Relaxed) {
        info!("Grid search for {} cancelled", symbol);
        return Err(AppError::OptimizationCancelled);
    }
    debug!("{}: {} MA series cached", symbol, cache.cached_series());
    results
}

/// One pair, one full pipeline run.
pub fn evaluate_pair(
    symbol: &str,
    window: &[Bar],
    cache: &IndicatorCache,
    fast: usize,
    slow: usize,
    base: &BacktestConfig,
) -> Result<OptimizationResult, AppError> {
    let config = base.with_pair(fast, slow);
    if window.len() < config.required_bars() {
        return Ok(OptimizationResult {
            fast_period: fast,
            slow_period: slow,
            ma_distance: slow.saturating_sub(fast),
            metrics: empty_metrics(config.initial_capital),
            insufficient_data: true,
        });
    }

    let series = cache.series(config.ma_type, fast, slow)?;
    let results = run_with_series(symbol, window, &series, &config);
    let metrics = results
        .performance_metrics
        .unwrap_or_else(|| empty_metrics(config.initial_capital));

    Ok(OptimizationResult {
        fast_period: fast,
        slow_period: slow,
        ma_distance: slow - fast,
        metrics,
        insufficient_data: false,
    })
}

/// Aggregates over the whole evaluated set.
pub fn summary_stats(results: &[OptimizationResult]) -> SummaryStats {
    if results.is_empty() {
        return SummaryStats::default();
    }
    let n = results.len() as f64;
    let returns = results.iter().map(|r| r.metrics.total_return_percent);
    SummaryStats {
        avg_return: returns.clone().sum::<f64>() / n,
        max_return: returns.clone().fold(f64::NEG_INFINITY, f64::max),
        min_return: returns.fold(f64::INFINITY, f64::min),
        avg_sharpe: results.iter().map(|r| r.metrics.sharpe_ratio).sum::<f64>() / n,
        avg_trades: results.iter().map(|r| r.metrics.total_trades as f64).sum::<f64>() / n,
    }
}

fn date_range(window: &[Bar]) -> Option<String> {
    match (window.first(), window.last()) {
        (Some(first), Some(last)) => Some(format!("{} to {}", first.date, last.date)),
        _ => None,
    }
}

// ══════════════════════════════════════════════════════════════
// Heatmap
// ══════════════════════════════════════════════════════════════

/// Lay every evaluated pair of a sweep out as `(fast, slow) -> metric`.
pub fn build_heatmap(summary: &OptimizationSummary, metric: HeatmapMetric) -> HeatmapData {
    let mut cells: Vec<HeatmapCell> = summary
        .all_results
        .iter()
        .map(|r| HeatmapCell {
            fast_period: r.fast_period,
            slow_period: r.slow_period,
            value: if r.insufficient_data {
                None
            } else {
                metric_value(r, metric)
            },
            total_trades: r.metrics.total_trades,
        })
        .collect();
    cells.sort_by_key(|c| (c.fast_period, c.slow_period));

    let values = cells.iter().filter_map(|c| c.value);
    let best_value = values.clone().reduce(f64::max);
    let worst_value = values.reduce(f64::min);

    HeatmapData {
        symbol: summary.symbol.clone(),
        metric,
        cells,
        best_value,
        worst_value,
    }
}

fn metric_value(result: &OptimizationResult, metric: HeatmapMetric) -> Option<f64> {
    let m = &result.metrics;
    match metric {
        HeatmapMetric::Return => Some(m.total_return_percent),
        HeatmapMetric::Sharpe => Some(m.sharpe_ratio),
        HeatmapMetric::WinRate => Some(m.win_rate),
        HeatmapMetric::ProfitFactor => m.profit_factor,
    }
}

// ══════════════════════════════════════════════════════════════
// Tests
// ══════════════════════════════════════════════════════════════
