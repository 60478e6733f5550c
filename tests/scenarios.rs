//! End-to-end backtest and optimizer scenarios over hand-built bar fixtures.

use std::sync::atomic::AtomicBool;

use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use ma_backtester::engine::cross_symbol::run_cross_symbol;
use ma_backtester::engine::executor::run_backtest;
use ma_backtester::engine::optimizer::{compare_pairs, generate_pairs, optimize};
use ma_backtester::errors::AppError;
use ma_backtester::models::bar::Bar;
use ma_backtester::models::config::{BacktestConfig, MaType, OptimizationConfig, PeriodRange};
use ma_backtester::models::signal::SignalType;
use ma_backtester::models::symbol::SymbolBars;
use ma_backtester::models::trade::ExitReason;

// ── Fixtures ─────────────────────────────────────────────────────────

fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 3).unwrap() + Days::new(i as u64)
}

/// Bars with a fixed +/- `half_range` around each close.
fn bars_from(closes: &[f64], half_range: f64) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            date: day(i),
            open: c,
            high: c + half_range,
            low: c - half_range,
            close: c,
            volume: 1_000.0,
        })
        .collect()
}

fn fixture_config() -> BacktestConfig {
    BacktestConfig {
        initial_capital: 10_000.0,
        atr_period: 5,
        atr_multiplier: 2.0,
        ma_type: MaType::Ema,
        fast_period: 3,
        slow_period: 5,
        ..Default::default()
    }
}

/// Flat at 100 for ten bars, then 110 through day 29, then `day30_close`.
fn step_up_then(day30_close: f64) -> Vec<Bar> {
    let mut closes = vec![100.0; 10];
    closes.extend([110.0; 20]);
    closes.push(day30_close);
    bars_from(&closes, 5.0)
}

fn wave(n: usize, phase: f64, drift: f64) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 + phase;
            100.0 + (t / 8.0).sin() * 6.0 + (t / 23.0).cos() * 3.0 + drift * i as f64
        })
        .collect();
    bars_from(&closes, 1.5)
}

// ── Scenario A: no crossovers ────────────────────────────────────────

#[test]
fn constant_prices_never_trade() {
    let bars = bars_from(&[100.0; 60], 0.0);
    let res = run_backtest("FLAT", &bars, &fixture_config()).unwrap();

    assert!(res.trades.is_empty());
    assert!(res.signals.is_empty());
    let metrics = res.performance_metrics.unwrap();
    assert_eq!(metrics.total_trades, 0);
    assert_eq!(metrics.total_return_percent, 0.0);
    assert_eq!(metrics.final_value, 10_000.0);
    assert_eq!(metrics.win_rate, 0.0);
    assert_eq!(res.equity_curve.len(), 1);
}

// ── Scenario B: one MA-signal round trip ─────────────────────────────

#[test]
fn step_up_then_fade_exits_on_fast_ma() {
    let bars = step_up_then(105.0);
    let res = run_backtest("STEP", &bars, &fixture_config()).unwrap();

    assert_eq!(res.trades.len(), 1);
    let trade = &res.trades[0];
    assert_eq!(trade.entry_date, day(10));
    assert_eq!(trade.exit_date, Some(day(30)));
    assert_eq!(trade.exit_reason, ExitReason::MaSignal);
    assert_eq!(trade.entry_price, 110.0);
    assert_eq!(trade.shares, 90);
    assert_eq!(trade.duration_days, Some(20));
    assert!((trade.pnl.unwrap() - -450.0).abs() < 1e-9);

    let buys = res
        .signals
        .iter()
        .filter(|s| s.signal_type == SignalType::Buy)
        .count();
    assert_eq!(buys, 1);

    let metrics = res.performance_metrics.unwrap();
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.losing_trades, 1);
    assert!((metrics.final_value - 9_550.0).abs() < 1e-9);
    assert!((metrics.total_return_percent - -4.5).abs() < 1e-9);
    assert_eq!(metrics.profit_factor, Some(0.0));
    assert_eq!(res.equity_curve.len(), 2);
    assert_eq!(res.equity_curve[1].date, day(30));
}

// ── Scenario C: stop beats the MA exits ──────────────────────────────

#[test]
fn sharp_drop_exits_on_trailing_stop() {
    let mut bars = step_up_then(80.0);
    // Wide range on the crash bar keeps low <= close <= high.
    bars[30].high = 85.0;
    bars[30].low = 75.0;
    let res = run_backtest("CRASH", &bars, &fixture_config()).unwrap();

    assert_eq!(res.trades.len(), 1);
    let trade = &res.trades[0];
    assert_eq!(trade.exit_date, Some(day(30)));
    assert_eq!(trade.exit_reason, ExitReason::TrailingStop);

    let sell = res
        .signals
        .iter()
        .find(|s| s.signal_type == SignalType::Sell)
        .unwrap();
    assert_eq!(sell.exit_reason, Some(ExitReason::TrailingStop));
    // Close is below the fast MA too; the stop still wins.
    assert!(sell.price < sell.fast_ma);
    assert!(sell.price <= sell.trailing_stop);
}

// ── Scenario D: determinism ──────────────────────────────────────────

#[test]
fn identical_runs_are_identical() {
    let bars = wave(400, 0.0, 0.02);
    let cfg = BacktestConfig {
        fast_period: 8,
        slow_period: 21,
        atr_period: 10,
        ..fixture_config()
    };
    let first = run_backtest("WAVE", &bars, &cfg).unwrap();
    let second = run_backtest("WAVE", &bars, &cfg).unwrap();

    assert!(!first.trades.is_empty());
    assert_eq!(
        serde_json::to_string(&first.trades).unwrap(),
        serde_json::to_string(&second.trades).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.performance_metrics).unwrap(),
        serde_json::to_string(&second.performance_metrics).unwrap()
    );
}

// ── Scenario E: empty grid ───────────────────────────────────────────

#[test]
fn grid_narrower_than_min_distance_is_rejected() {
    let config = OptimizationConfig {
        fast_range: PeriodRange::new(10, 10),
        slow_range: PeriodRange::new(15, 15),
        min_distance: 10,
        backtest: fixture_config(),
    };
    let err = optimize("WAVE", &wave(200, 0.0, 0.0), &config, &AtomicBool::new(false)).unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidParameterRange {
            fast_range: (10, 10),
            slow_range: (15, 15),
            min_distance: 10
        }
    ));
    assert_eq!(err.code(), "INVALID_PARAMETER_RANGE");
}

// ── Degenerate capital ───────────────────────────────────────────────

#[test]
fn unaffordable_entry_is_reported_not_fatal() {
    let mut closes = vec![5_000.0; 10];
    closes.extend([5_500.0; 5]);
    let bars = bars_from(&closes, 10.0);
    let cfg = BacktestConfig {
        initial_capital: 1_000.0,
        ..fixture_config()
    };
    let res = run_backtest("PRICY", &bars, &cfg).unwrap();

    assert!(res.trades.is_empty());
    assert!(!res.skipped_entries.is_empty());
    let first_skip = &res.skipped_entries[0];
    assert_eq!(first_skip.date, day(10));
    assert_eq!(first_skip.capital_allocated, 1_000.0);

    let buy = &res.signals[0];
    assert_eq!(buy.signal_type, SignalType::Buy);
    assert!(buy.reasoning.contains("entry skipped"));
    assert_eq!(res.performance_metrics.unwrap().final_value, 1_000.0);
}

#[test]
fn position_sizing_limits_shares() {
    let bars = step_up_then(105.0);
    let cfg = BacktestConfig {
        position_sizing_percentage: Some(50.0),
        ..fixture_config()
    };
    let res = run_backtest("STEP", &bars, &cfg).unwrap();
    assert_eq!(res.trades[0].shares, 45);
}

#[test]
fn days_keeps_most_recent_window() {
    let bars = wave(300, 0.0, 0.0);
    let cfg = BacktestConfig {
        days: 120,
        ..fixture_config()
    };
    let res = run_backtest("WAVE", &bars, &cfg).unwrap();
    assert_eq!(res.total_days, 120);
    assert_eq!(res.start_date, Some(day(180)));
    assert_eq!(res.end_date, Some(day(299)));
}

// ── Optimizer ────────────────────────────────────────────────────────

#[test]
fn optimizer_counts_every_pair_and_ranks_best_first() {
    let config = OptimizationConfig {
        fast_range: PeriodRange::new(3, 8),
        slow_range: PeriodRange::new(10, 20),
        min_distance: 4,
        backtest: fixture_config(),
    };
    let summary = optimize("wave", &wave(250, 0.0, 0.05), &config, &AtomicBool::new(false)).unwrap();

    let expected = (3..=8)
        .flat_map(|f| (10..=20).map(move |s| (f, s)))
        .filter(|(f, s)| s - f >= 4)
        .count();
    assert_eq!(summary.total_pairs_tested, expected);
    assert_eq!(summary.all_results.len(), expected);
    assert!(summary.top_5_pairs.len() <= 5);

    let best = summary.best_pair.as_ref().unwrap();
    assert_eq!(best, &summary.top_5_pairs[0]);
    for r in &summary.all_results {
        assert!(r.slow_period - r.fast_period >= 4);
        assert!(best.metrics.total_return_percent >= r.metrics.total_return_percent);
    }
    assert!(summary.summary_stats.max_return >= summary.summary_stats.avg_return);
    assert!(summary.summary_stats.avg_return >= summary.summary_stats.min_return);
}

#[test]
fn shuffled_pair_order_ranks_the_same() {
    let bars = wave(300, 1.0, 0.03);
    let cfg = fixture_config();
    let pairs = generate_pairs(PeriodRange::new(2, 12), PeriodRange::new(8, 30), 3);
    let baseline = compare_pairs("WAVE", &bars, &pairs, &cfg, &AtomicBool::new(false)).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..5 {
        let mut shuffled = pairs.clone();
        shuffled.shuffle(&mut rng);
        let ranked = compare_pairs("WAVE", &bars, &shuffled, &cfg, &AtomicBool::new(false)).unwrap();
        assert_eq!(ranked, baseline);
    }
}

#[test]
fn cancelled_sweep_returns_nothing() {
    let config = OptimizationConfig {
        fast_range: PeriodRange::new(3, 8),
        slow_range: PeriodRange::new(10, 20),
        min_distance: 4,
        backtest: fixture_config(),
    };
    let err = optimize("WAVE", &wave(200, 0.0, 0.0), &config, &AtomicBool::new(true)).unwrap_err();
    assert!(matches!(err, AppError::OptimizationCancelled));
}

#[test]
fn short_history_pairs_are_flagged_in_sweep() {
    let config = OptimizationConfig {
        fast_range: PeriodRange::new(3, 3),
        slow_range: PeriodRange::new(10, 40),
        min_distance: 5,
        backtest: fixture_config(),
    };
    let summary = optimize("WAVE", &wave(30, 0.0, 0.0), &config, &AtomicBool::new(false)).unwrap();
    assert_eq!(summary.total_pairs_tested, 31);

    let too_long: Vec<_> = summary
        .all_results
        .iter()
        .filter(|r| r.insufficient_data)
        .collect();
    // slow_period >= 30 needs at least 31 bars
    assert_eq!(too_long.len(), 11);
    for r in too_long {
        assert_eq!(r.metrics.total_trades, 0);
        assert_eq!(r.metrics.total_return_percent, 0.0);
    }
}

// ── Cross-symbol ─────────────────────────────────────────────────────

#[test]
fn cross_symbol_averages_over_universe() {
    let config = OptimizationConfig {
        fast_range: PeriodRange::new(3, 6),
        slow_range: PeriodRange::new(10, 16),
        min_distance: 5,
        backtest: fixture_config(),
    };
    let universe = vec![
        SymbolBars::new("aaa", wave(250, 0.0, 0.04)),
        SymbolBars::new("bbb", wave(250, 5.0, -0.01)),
        SymbolBars::new("ccc", wave(250, 11.0, 0.02)),
    ];
    let out = run_cross_symbol(&universe, &config, &AtomicBool::new(false)).unwrap();

    assert_eq!(out.symbols_analyzed, 3);
    assert_eq!(out.successful_optimizations, 3);
    let symbols: Vec<&str> = out.per_symbol_results.iter().map(|s| s.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAA", "BBB", "CCC"]);

    let best = out.universal_best_pair.as_ref().unwrap();
    assert_eq!(best.symbols_evaluated, 3);
    assert_eq!(best, &out.universal_top_5[0]);

    // The universal best is the mean of that pair's per-symbol returns.
    let mean: f64 = out
        .per_symbol_results
        .iter()
        .map(|s| {
            s.all_results
                .iter()
                .find(|r| r.fast_period == best.fast_period && r.slow_period == best.slow_period)
                .unwrap()
                .metrics
                .total_return_percent
        })
        .sum::<f64>()
        / 3.0;
    assert!((best.avg_return_percent - mean).abs() < 1e-9);

    let winners: usize = out
        .insights
        .most_common_optimal_pairs
        .iter()
        .map(|p| p.count)
        .sum();
    assert!(winners <= 3 && winners >= 1);
}
