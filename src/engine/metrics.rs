use statrs::statistics::Statistics;

use crate::models::result::{EquityPoint, PerformanceMetrics};
use crate::models::trade::Trade;

const DAYS_PER_YEAR: f64 = 365.0;

/// Calculate all backtest metrics.
///
/// Only closed trades count toward trade statistics, Sharpe and drawdown.
/// `final_value` already includes the mark of any position still open, so
/// the return reflects it. `span_days` is the calendar span of the evaluated window.
pub fn calculate_metrics(
    trades: &[Trade],
    equity_curve: &[EquityPoint],
    initial_capital: f64,
    final_value: f64,
    span_days: i64,
) -> PerformanceMetrics {
    let closed: Vec<&Trade> = trades.iter().filter(|t| t.is_closed()).collect();
    let total_trades = closed.len();

    let total_return_percent = if initial_capital > 0.0 {
        (final_value / initial_capital - 1.0) * 100.0
    } else {
        0.0
    };

    if total_trades == 0 {
        return PerformanceMetrics {
            total_return_percent,
            final_value,
            ..empty_metrics(initial_capital)
        };
    }

    // ── Trade classification ──
    let wins: Vec<f64> = closed
        .iter()
        .map(|t| t.realized_pnl())
        .filter(|pnl| *pnl > 0.0)
        .collect();
    let losses: Vec<f64> = closed
        .iter()
        .map(|t| t.realized_pnl())
        .filter(|pnl| *pnl < 0.0)
        .collect();

    let winning_trades = wins.len();
    let losing_trades = losses.len();
    let win_rate = winning_trades as f64 / total_trades as f64 * 100.0;

    // ── P&L ──
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum::<f64>().abs();
    let total_pnl: f64 = closed.iter().map(|t| t.realized_pnl()).sum();
    let avg_win = if winning_trades > 0 {
        gross_profit / winning_trades as f64
    } else {
        0.0
    };
    let avg_loss = if losing_trades > 0 {
        -gross_loss / losing_trades as f64
    } else {
        0.0
    };
    let profit_factor = if gross_loss > 0.0 {
        Some(gross_profit / gross_loss)
    } else {
        None
    };

    // ── Risk ──
    let max_drawdown_percent = calculate_max_drawdown(equity_curve);
    let returns: Vec<f64> = closed.iter().filter_map(|t| t.pnl_percent).collect();
    let sharpe_ratio = calculate_sharpe(&returns, span_days);

    // ── Time ──
    let avg_trade_duration_days = closed
        .iter()
        .filter_map(|t| t.duration_days)
        .sum::<i64>() as f64
        / total_trades as f64;

    PerformanceMetrics {
        total_return_percent,
        final_value,
        total_pnl,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        avg_win,
        avg_loss,
        profit_factor,
        max_drawdown_percent,
        sharpe_ratio,
        avg_trade_duration_days,
    }
}

/// Flat metrics for a run that never traded.
pub fn empty_metrics(initial_capital: f64) -> PerformanceMetrics {
    PerformanceMetrics {
        total_return_percent: 0.0,
        final_value: initial_capital,
        total_pnl: 0.0,
        total_trades: 0,
        winning_trades: 0,
        losing_trades: 0,
        win_rate: 0.0,
        avg_win: 0.0,
        avg_loss: 0.0,
        profit_factor: None,
        max_drawdown_percent: 0.0,
        sharpe_ratio: 0.0,
        avg_trade_duration_days: 0.0,
    }
}

/// Largest peak-to-trough decline on the step equity curve, in percent of the peak.
pub fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let Some(first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first.equity;
    let mut max_dd_pct = 0.0f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            let dd_pct = (peak - point.equity) / peak * 100.0;
            if dd_pct > max_dd_pct {
                max_dd_pct = dd_pct;
            }
        }
    }
    max_dd_pct
}

/// Sharpe Ratio over per-trade percent returns, zero risk-free rate:
/// mean / sample std × sqrt(trades per year), trades per year = n / (span_days / 365).
pub fn calculate_sharpe(returns: &[f64], span_days: i64) -> f64 {
    let n = returns.len();
    if n < 2 || span_days <= 0 {
        return 0.0;
    }
    let mean = returns.iter().mean();
    let std_dev = returns.iter().std_dev();
    if !std_dev.is_finite() || std_dev == 0.0 {
        return 0.0;
    }
    let trades_per_year = n as f64 / (span_days as f64 / DAYS_PER_YEAR);
    (mean / std_dev) * trades_per_year.sqrt()
}
