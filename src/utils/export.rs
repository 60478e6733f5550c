use std::path::Path;

use crate::errors::AppError;
use crate::models::result::{EquityPoint, OptimizationResult, PerformanceMetrics};
use crate::models::trade::Trade;

fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, AppError> {
    csv::Writer::from_path(path)
        .map_err(|e| AppError::FileWrite(format!("Cannot create CSV {}: {}", path.display(), e)))
}

fn opt_f64(v: Option<f64>, precision: usize) -> String {
    v.map(|x| format!("{:.*}", precision, x)).unwrap_or_default()
}

/// Write a list of trades to a CSV file. Open trades leave the exit columns empty.
pub fn write_trades_csv(trades: &[Trade], path: &Path) -> Result<(), AppError> {
    let mut wtr = create_writer(path)?;

    wtr.write_record([
        "Entry Date",
        "Entry Price",
        "Exit Date",
        "Exit Price",
        "Shares",
        "Exit Reason",
        "P&L",
        "P&L %",
        "Duration (days)",
        "Mark Price",
        "Unrealized P&L",
    ])
    .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for t in trades {
        wtr.write_record([
            t.entry_date.to_string(),
            format!("{:.4}", t.entry_price),
            t.exit_date.map(|d| d.to_string()).unwrap_or_default(),
            opt_f64(t.exit_price, 4),
            t.shares.to_string(),
            t.exit_reason.to_string(),
            opt_f64(t.pnl, 2),
            opt_f64(t.pnl_percent, 2),
            t.duration_days.map(|d| d.to_string()).unwrap_or_default(),
            opt_f64(t.mark_price, 4),
            opt_f64(t.unrealized_pnl, 2),
        ])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write backtest metrics as a key-value CSV report.
pub fn write_metrics_csv(metrics: &PerformanceMetrics, path: &Path) -> Result<(), AppError> {
    let mut wtr = create_writer(path)?;

    wtr.write_record(["Metric", "Value"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;

    let rows: Vec<(&str, String)> = vec![
        // Returns
        ("Final Value", format!("{:.2}", metrics.final_value)),
        ("Total Return %", format!("{:.2}", metrics.total_return_percent)),
        ("Total P&L", format!("{:.2}", metrics.total_pnl)),
        // Trades
        ("Total Trades", metrics.total_trades.to_string()),
        ("Winning Trades", metrics.winning_trades.to_string()),
        ("Losing Trades", metrics.losing_trades.to_string()),
        ("Win Rate %", format!("{:.2}", metrics.win_rate)),
        // P&L
        ("Avg Win", format!("{:.2}", metrics.avg_win)),
        ("Avg Loss", format!("{:.2}", metrics.avg_loss)),
        ("Profit Factor", opt_f64(metrics.profit_factor, 2)),
        // Risk
        ("Max Drawdown %", format!("{:.2}", metrics.max_drawdown_percent)),
        ("Sharpe Ratio", format!("{:.2}", metrics.sharpe_ratio)),
        // Time
        ("Avg Trade Duration (days)", format!("{:.1}", metrics.avg_trade_duration_days)),
    ];

    for (name, value) in &rows {
        wtr.write_record([*name, value.as_str()])
            .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write the equity curve, one row per trade close.
pub fn write_equity_csv(curve: &[EquityPoint], path: &Path) -> Result<(), AppError> {
    let mut wtr = create_writer(path)?;
    wtr.write_record(["Date", "Equity"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    for p in curve {
        wtr.write_record([p.date.to_string(), format!("{:.2}", p.equity)])
            .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }
    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write ranked optimization results, best first.
pub fn write_optimization_csv(results: &[OptimizationResult], path: &Path) -> Result<(), AppError> {
    let mut wtr = create_writer(path)?;

    wtr.write_record([
        "Rank",
        "Fast",
        "Slow",
        "Distance",
        "Total Return %",
        "Sharpe",
        "Trades",
        "Win Rate %",
        "Profit Factor",
        "Max Drawdown %",
        "Insufficient Data",
    ])
    .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for (i, r) in results.iter().enumerate() {
        let m = &r.metrics;
        wtr.write_record([
            (i + 1).to_string(),
            r.fast_period.to_string(),
            r.slow_period.to_string(),
            r.ma_distance.to_string(),
            format!("{:.2}", m.total_return_percent),
            format!("{:.3}", m.sharpe_ratio),
            m.total_trades.to_string(),
            format!("{:.1}", m.win_rate),
            opt_f64(m.profit_factor, 2),
            format!("{:.2}", m.max_drawdown_percent),
            r.insufficient_data.to_string(),
        ])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}
