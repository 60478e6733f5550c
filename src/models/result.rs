use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, ErrorResponse};

use super::config::{MaType, OptimizationConfig};
use super::signal::{MeanReversionAlert, Signal, SkippedEntry};
use super::trade::Trade;

/// A point on the equity curve, sampled at each trade close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

/// Summary statistics of one backtest. Rebuilt from scratch on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Returns
    pub total_return_percent: f64,
    pub final_value: f64,
    pub total_pnl: f64,

    // Trades
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L
    pub avg_win: f64,
    pub avg_loss: f64,
    /// `None` when there is no losing trade to divide by.
    pub profit_factor: Option<f64>,

    // Risk
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,

    // Time
    pub avg_trade_duration_days: f64,
}

/// Complete results of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResults {
    pub symbol: String,
    pub ma_type: MaType,
    pub fast_period: usize,
    pub slow_period: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Number of bars evaluated.
    pub total_days: usize,
    pub trades: Vec<Trade>,
    pub signals: Vec<Signal>,
    pub mean_reversion_alerts: Vec<MeanReversionAlert>,
    pub skipped_entries: Vec<SkippedEntry>,
    /// `None` when the run had too little data to evaluate.
    pub performance_metrics: Option<PerformanceMetrics>,
    pub equity_curve: Vec<EquityPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ErrorResponse>,
}

// ══════════════════════════════════════════════════════════════
// Optimization types
// ══════════════════════════════════════════════════════════════

/// Outcome of evaluating one (fast, slow) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub fast_period: usize,
    pub slow_period: usize,
    pub ma_distance: usize,
    pub metrics: PerformanceMetrics,
    /// The bar window was shorter than this pair needs; metrics are flat.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insufficient_data: bool,
}

/// Aggregates over every evaluated pair, not just the top few.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub avg_return: f64,
    pub max_return: f64,
    pub min_return: f64,
    pub avg_sharpe: f64,
    pub avg_trades: f64,
}

/// Ranked grid-search output for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub symbol: String,
    pub best_pair: Option<OptimizationResult>,
    pub top_5_pairs: Vec<OptimizationResult>,
    pub total_pairs_tested: usize,
    pub summary_stats: SummaryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<String>,
    pub parameters_used: OptimizationConfig,
    /// Every evaluated pair in rank order.
    #[serde(skip)]
    pub all_results: Vec<OptimizationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl OptimizationSummary {
    /// Summary for a sweep that never ran, carrying the reason.
    pub fn failed(symbol: &str, config: &OptimizationConfig, err: &AppError) -> Self {
        Self {
            symbol: symbol.to_string(),
            best_pair: None,
            top_5_pairs: Vec::new(),
            total_pairs_tested: 0,
            summary_stats: SummaryStats::default(),
            date_range: None,
            parameters_used: config.clone(),
            all_results: Vec::new(),
            error: Some(ErrorResponse::from(err)),
        }
    }
}

/// Metric plotted on a (fast, slow) heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapMetric {
    Return,
    Sharpe,
    WinRate,
    ProfitFactor,
}

impl std::str::FromStr for HeatmapMetric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "return" => Ok(HeatmapMetric::Return),
            "sharpe" => Ok(HeatmapMetric::Sharpe),
            "win_rate" => Ok(HeatmapMetric::WinRate),
            "profit_factor" => Ok(HeatmapMetric::ProfitFactor),
            _ => Err(AppError::InvalidConfig(format!(
                "metric must be one of return, sharpe, win_rate, profit_factor; got \"{}\"",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub fast_period: usize,
    pub slow_period: usize,
    pub value: Option<f64>,
    pub total_trades: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapData {
    pub symbol: String,
    pub metric: HeatmapMetric,
    pub cells: Vec<HeatmapCell>,
    pub best_value: Option<f64>,
    pub worst_value: Option<f64>,
}

// ══════════════════════════════════════════════════════════════
// Cross-symbol types
// ══════════════════════════════════════════════════════════════

/// One pair's performance averaged over every symbol that evaluated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalPairResult {
    pub fast_period: usize,
    pub slow_period: usize,
    pub ma_distance: usize,
    pub symbols_evaluated: usize,
    pub avg_return_percent: f64,
    pub avg_sharpe_ratio: f64,
    pub avg_total_trades: f64,
    pub avg_win_rate: f64,
    pub avg_max_drawdown_percent: f64,
}

/// How often a pair came out on top for an individual symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFrequency {
    pub fast_period: usize,
    pub slow_period: usize,
    pub count: usize,
    pub avg_return: f64,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniversalInsights {
    pub most_common_optimal_pairs: Vec<PairFrequency>,
    pub avg_optimal_fast: f64,
    pub avg_optimal_slow: f64,
    pub avg_optimal_distance: f64,
    pub avg_best_return: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSymbolSummary {
    pub universal_best_pair: Option<UniversalPairResult>,
    pub universal_top_5: Vec<UniversalPairResult>,
    pub per_symbol_results: Vec<OptimizationSummary>,
    pub symbols_analyzed: usize,
    pub successful_optimizations: usize,
    pub insights: UniversalInsights,
}
