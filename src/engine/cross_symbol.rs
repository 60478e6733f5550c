use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::config::OptimizationConfig;
use crate::models::result::{
    CrossSymbolSummary, OptimizationSummary, PairFrequency, UniversalInsights,
    UniversalPairResult,
};
use crate::models::symbol::SymbolBars;

use super::optimizer::{generate_pairs, optimize, Ranked, TOP_N};

/// Optimize every symbol over the same pair space, then find the pair that
/// does best on average across all of them.
///
/// A symbol whose sweep fails is reported with its error and left out of the
/// averages. Cancellation aborts the whole run.
pub fn run_cross_symbol(
    universe: &[SymbolBars],
    config: &OptimizationConfig,
    cancel_flag: &AtomicBool,
) -> Result<CrossSymbolSummary, AppError> {
    if universe.is_empty() {
        return Err(AppError::EmptyUniverse);
    }
    config.validate()?;
    if generate_pairs(config.fast_range, config.slow_range, config.min_distance).is_empty() {
        return Err(AppError::InvalidParameterRange {
            fast_range: config.fast_range.as_tuple(),
            slow_range: config.slow_range.as_tuple(),
            min_distance: config.min_distance,
        });
    }

    info!("Cross-symbol optimization over {} symbols", universe.len());
    let start = Instant::now();

    let per_symbol_results = universe
        .par_iter()
        .map(|sym| match optimize(&sym.symbol, &sym.bars, config, cancel_flag) {
            Ok(summary) => Ok(summary),
            Err(AppError::OptimizationCancelled) => Err(AppError::OptimizationCancelled),
            Err(e) => {
                warn!("Optimization failed for {}: {}", sym.symbol, e);
                Ok(OptimizationSummary::failed(&sym.symbol, config, &e))
            }
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    if cancel_flag.load(Ordering::Relaxed) {
        return Err(AppError::OptimizationCancelled);
    }

    let mut universal = aggregate_pairs(&per_symbol_results);
    rank_by_coverage(&mut universal);
    let insights = build_insights(&per_symbol_results);
    let successful_optimizations = per_symbol_results
        .iter()
        .filter(|s| s.error.is_none() && s.best_pair.is_some())
        .count();

    info!(
        "Cross-symbol optimization complete: {}/{} symbols in {:.2}s",
        successful_optimizations,
        universe.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(CrossSymbolSummary {
        universal_best_pair: universal.first().cloned(),
        universal_top_5: universal.into_iter().take(TOP_N).collect(),
        symbols_analyzed: per_symbol_results.len(),
        successful_optimizations,
        per_symbol_results,
        insights,
    })
}

#[derive(Default)]
struct PairAccumulator {
    symbols: usize,
    total_return: f64,
    sharpe: f64,
    trades: f64,
    win_rate: f64,
    max_drawdown: f64,
}

/// Average each pair's metrics over the symbols that could evaluate it.
pub fn aggregate_pairs(summaries: &[OptimizationSummary]) -> Vec<UniversalPairResult> {
    let mut by_pair: BTreeMap<(usize, usize), PairAccumulator> = BTreeMap::new();
    for summary in summaries.iter().filter(|s| s.error.is_none()) {
        for r in summary.all_results.iter().filter(|r| !r.insufficient_data) {
            let acc = by_pair.entry((r.fast_period, r.slow_period)).or_default();
            acc.symbols += 1;
            acc.total_return += r.metrics.total_return_percent;
            acc.sharpe += r.metrics.sharpe_ratio;
            acc.trades += r.metrics.total_trades as f64;
            acc.win_rate += r.metrics.win_rate;
            acc.max_drawdown += r.metrics.max_drawdown_percent;
        }
    }

    by_pair
        .into_iter()
        .map(|((fast, slow), acc)| {
            let n = acc.symbols as f64;
            UniversalPairResult {
                fast_period: fast,
                slow_period: slow,
                ma_distance: slow - fast,
                symbols_evaluated: acc.symbols,
                avg_return_percent: acc.total_return / n,
                avg_sharpe_ratio: acc.sharpe / n,
                avg_total_trades: acc.trades / n,
                avg_win_rate: acc.win_rate / n,
                avg_max_drawdown_percent: acc.max_drawdown / n,
            }
        })
        .collect()
}

/// Sort best-first, pairs evaluated on more symbols ahead of pairs evaluated on fewer.
///
/// A pair that only some symbols had the history for is averaged over those
/// symbols alone, so it never outranks a pair that ran on the whole universe.
pub fn rank_by_coverage(pairs: &mut [UniversalPairResult]) {
    pairs.sort_by(|a, b| {
        b.symbols_evaluated
            .cmp(&a.symbols_evaluated)
            .then_with(|| a.rank_key().compare(&b.rank_key()))
    });
}

/// Which pairs won most often per symbol, and what the winners look like on average.
pub fn build_insights(summaries: &[OptimizationSummary]) -> UniversalInsights {
    let winners: Vec<(&str, _)> = summaries
        .iter()
        .filter(|s| s.error.is_none())
        .filter_map(|s| s.best_pair.as_ref().map(|b| (s.symbol.as_str(), b)))
        .collect();
    if winners.is_empty() {
        return UniversalInsights::default();
    }

    let mut groups: BTreeMap<(usize, usize), (Vec<String>, f64)> = BTreeMap::new();
    for (symbol, best) in &winners {
        let entry = groups
            .entry((best.fast_period, best.slow_period))
            .or_insert_with(|| (Vec::new(), 0.0));
        entry.0.push(symbol.to_string());
        entry.1 += best.metrics.total_return_percent;
    }

    let mut most_common: Vec<PairFrequency> = groups
        .into_iter()
        .map(|((fast, slow), (symbols, return_sum))| PairFrequency {
            fast_period: fast,
            slow_period: slow,
            count: symbols.len(),
            avg_return: return_sum / symbols.len() as f64,
            symbols,
        })
        .collect();
    most_common.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.avg_return.total_cmp(&a.avg_return))
            .then_with(|| a.fast_period.cmp(&b.fast_period))
            .then_with(|| a.slow_period.cmp(&b.slow_period))
    });
    most_common.truncate(TOP_N);

    let n = winners.len() as f64;
    UniversalInsights {
        most_common_optimal_pairs: most_common,
        avg_optimal_fast: winners.iter().map(|(_, b)| b.fast_period as f64).sum::<f64>() / n,
        avg_optimal_slow: winners.iter().map(|(_, b)| b.slow_period as f64).sum::<f64>() / n,
        avg_optimal_distance: winners.iter().map(|(_, b)| b.ma_distance as f64).sum::<f64>() / n,
        avg_best_return: winners
            .iter()
            .map(|(_, b)| b.metrics.total_return_percent)
            .sum::<f64>()
            / n,
    }
}
