use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::data::validator::validate_bars;
use crate::errors::{AppError, ErrorResponse};
use crate::models::bar::Bar;
use crate::models::config::BacktestConfig;
use crate::models::result::{BacktestResults, EquityPoint};
use crate::models::signal::{MeanReversionAlert, Signal, SignalType, SkippedEntry};
use crate::models::trade::{ExitReason, Trade};

use super::indicators::IndicatorSeries;
use super::metrics::calculate_metrics;
use super::position::TradeSimulator;
use super::signals::{evaluate_bar, first_signal_index, BarIndicators, PositionView};

/// One item of a backtest's event stream, in bar order.
#[derive(Debug, Clone, PartialEq)]
pub enum BacktestEvent {
    Signal(Signal),
    /// A BUY that could not afford a share. Follows its signal.
    SkippedEntry(SkippedEntry),
    /// A SELL's trade. Follows its signal.
    TradeClosed(Trade),
    Alert(MeanReversionAlert),
}

/// Lazy bar-by-bar backtest over one window.
///
/// Each call to `next` advances at most as far as the next event. The stream is
/// a pure function of its inputs, so `restart` replays exactly the same events.
#[derive(Debug, Clone)]
pub struct BacktestStream<'a> {
    bars: &'a [Bar],
    series: &'a IndicatorSeries,
    config: &'a BacktestConfig,
    simulator: TradeSimulator,
    cursor: usize,
    pending: VecDeque<BacktestEvent>,
}

impl<'a> BacktestStream<'a> {
    pub fn new(bars: &'a [Bar], series: &'a IndicatorSeries, config: &'a BacktestConfig) -> Self {
        Self {
            bars,
            series,
            config,
            simulator: new_simulator(config),
            cursor: first_signal_index(config),
            pending: VecDeque::new(),
        }
    }

    /// Rewind to the first bar with a fresh simulator.
    pub fn restart(&mut self) {
        self.simulator = new_simulator(self.config);
        self.cursor = first_signal_index(self.config);
        self.pending.clear();
    }

    /// Simulator state after the bars consumed so far.
    pub fn simulator(&self) -> &TradeSimulator {
        &self.simulator
    }

    pub fn into_simulator(self) -> TradeSimulator {
        self.simulator
    }

    fn step(&mut self, i: usize) {
        let bar = &self.bars[i];
        let Some((fast_ma, slow_ma, atr)) = self.series.values_at(i) else {
            return;
        };

        // ── 1. Ratchet the stop of an open position ──
        let view = match self.simulator.update_stop(bar.close, atr) {
            Some(trailing_stop) => PositionView::Long { trailing_stop },
            None => PositionView::Flat,
        };

        // ── 2. Evaluate signals ──
        let ind = BarIndicators {
            fast_ma,
            slow_ma,
            atr,
        };
        let out = evaluate_bar(bar, ind, view, self.config);

        // ── 3. Apply the signal to the simulator ──
        if let Some(mut signal) = out.signal {
            match signal.signal_type {
                SignalType::Buy => match self.simulator.enter(i, bar, atr) {
                    Ok(pos) => {
                        debug!("Entered long on {}: {} shares @ {:.2}", bar.date, pos.shares, bar.close);
                        self.pending.push_back(BacktestEvent::Signal(signal));
                    }
                    Err(skipped) => {
                        warn!(
                            "Entry skipped on {}: {:.2} allocated buys no shares @ {:.2}",
                            skipped.date, skipped.capital_allocated, skipped.price
                        );
                        signal.reasoning.push_str(&format!(
                            "; entry skipped: {:.2} allocated buys no shares",
                            skipped.capital_allocated
                        ));
                        self.pending.push_back(BacktestEvent::Signal(signal));
                        self.pending.push_back(BacktestEvent::SkippedEntry(skipped));
                    }
                },
                SignalType::Sell => {
                    let reason = signal.exit_reason.unwrap_or(ExitReason::MaSignal);
                    let trade = self.simulator.exit(bar, reason).cloned();
                    self.pending.push_back(BacktestEvent::Signal(signal));
                    if let Some(trade) = trade {
                        debug!("Closed long on {} ({}): pnl={:?}", bar.date, reason, trade.pnl);
                        self.pending.push_back(BacktestEvent::TradeClosed(trade));
                    }
                }
            }
        }

        // ── 4. Informational alert ──
        if let Some(alert) = out.alert {
            self.pending.push_back(BacktestEvent::Alert(alert));
        }
    }
}

impl Iterator for BacktestStream<'_> {
    type Item = BacktestEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.cursor >= self.bars.len() {
                return None;
            }
            let i = self.cursor;
            self.cursor += 1;
            self.step(i);
        }
    }
}

fn new_simulator(config: &BacktestConfig) -> TradeSimulator {
    TradeSimulator::new(
        config.initial_capital,
        config.atr_multiplier,
        config.position_sizing_percentage,
    )
}

/// The most recent `days` bars, or all of them when `days` is 0.
pub fn window_bars(bars: &[Bar], days: usize) -> &[Bar] {
    if days == 0 || days >= bars.len() {
        bars
    } else {
        &bars[bars.len() - days..]
    }
}

/// Run a complete backtest for one symbol.
///
/// Too few bars for the configured pair is not an error: the result comes back
/// empty, with no metrics and an `INSUFFICIENT_DATA` warning.
pub fn run_backtest(
    symbol: &str,
    bars: &[Bar],
    config: &BacktestConfig,
) -> Result<BacktestResults, AppError> {
    config.validate()?;
    validate_bars(bars)?;

    let window = window_bars(bars, config.days);
    info!(
        "Starting backtest: {} bars, symbol={}, {} {}/{}",
        window.len(),
        symbol,
        config.ma_type,
        config.fast_period,
        config.slow_period
    );

    let needed = config.required_bars();
    if window.len() < needed {
        let err = AppError::InsufficientData {
            needed,
            available: window.len(),
        };
        warn!("Backtest for {} skipped: {}", symbol, err);
        return Ok(insufficient_results(symbol, window, config, &err));
    }

    let series = IndicatorSeries::compute(window, config)?;
    let results = run_with_series(symbol, window, &series, config);

    info!(
        "Backtest complete: {} trades, {} signals",
        results.trades.len(),
        results.signals.len()
    );
    Ok(results)
}

/// Run the pipeline over an already-windowed, already-validated bar slice.
pub fn run_with_series(
    symbol: &str,
    window: &[Bar],
    series: &IndicatorSeries,
    config: &BacktestConfig,
) -> BacktestResults {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        let err = AppError::InsufficientData {
            needed: config.required_bars(),
            available: 0,
        };
        return insufficient_results(symbol, window, config, &err);
    };

    let mut signals = Vec::new();
    let mut alerts = Vec::new();
    let mut skipped_entries = Vec::new();
    let mut trades = Vec::new();
    let mut equity = config.initial_capital;
    let mut equity_curve = vec![EquityPoint {
        date: first.date,
        equity,
    }];

    let mut stream = BacktestStream::new(window, series, config);
    for event in stream.by_ref() {
        match event {
            BacktestEvent::Signal(signal) => signals.push(signal),
            BacktestEvent::Alert(alert) => alerts.push(alert),
            BacktestEvent::SkippedEntry(skipped) => skipped_entries.push(skipped),
            BacktestEvent::TradeClosed(trade) => {
                equity += trade.realized_pnl();
                if let Some(date) = trade.exit_date {
                    equity_curve.push(EquityPoint { date, equity });
                }
                trades.push(trade);
            }
        }
    }

    let simulator = stream.into_simulator();
    let final_value = simulator.final_value(last.close);
    if let Some(open) = simulator.open_trade(last) {
        trades.push(open);
    }

    let span_days = (last.date - first.date).num_days();
    let metrics = calculate_metrics(
        &trades,
        &equity_curve,
        config.initial_capital,
        final_value,
        span_days,
    );

    BacktestResults {
        symbol: symbol.to_string(),
        ma_type: config.ma_type,
        fast_period: config.fast_period,
        slow_period: config.slow_period,
        start_date: Some(first.date),
        end_date: Some(last.date),
        total_days: window.len(),
        trades,
        signals,
        mean_reversion_alerts: alerts,
        skipped_entries,
        performance_metrics: Some(metrics),
        equity_curve,
        warning: None,
    }
}

fn insufficient_results(
    symbol: &str,
    window: &[Bar],
    config: &BacktestConfig,
    err: &AppError,
) -> BacktestResults {
    BacktestResults {
        symbol: symbol.to_string(),
        ma_type: config.ma_type,
        fast_period: config.fast_period,
        slow_period: config.slow_period,
        start_date: window.first().map(|b| b.date),
        end_date: window.last().map(|b| b.date),
        total_days: window.len(),
        trades: Vec::new(),
        signals: Vec::new(),
        mean_reversion_alerts: Vec::new(),
        skipped_entries: Vec::new(),
        performance_metrics: None,
        equity_curve: Vec::new(),
        warning: Some(ErrorResponse::from(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_bars(closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                date: start + chrono::Days::new(i as u64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    fn small_config() -> BacktestConfig {
        BacktestConfig {
            fast_period: 3,
            slow_period: 5,
            atr_period: 5,
            atr_multiplier: 2.0,
            initial_capital: 10_000.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_window_bars() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(window_bars(&bars, 0).len(), 4);
        assert_eq!(window_bars(&bars, 10).len(), 4);
        let w = window_bars(&bars, 2);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].close, 3.0);
    }

    #[test]
    fn test_insufficient_data_is_not_an_error() {
        let bars = make_bars(&[100.0; 5]);
        let res = run_backtest("ABC", &bars, &small_config()).unwrap();
        assert!(res.performance_metrics.is_none());
        assert!(res.trades.is_empty());
        assert_eq!(res.warning.unwrap().code, "INSUFFICIENT_DATA");
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        let bars = make_bars(&[100.0; 50]);
        let cfg = BacktestConfig {
            atr_period: 2,
            ..small_config()
        };
        assert!(matches!(
            run_backtest("ABC", &bars, &cfg),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stream_is_restartable() {
        let mut closes = vec![100.0; 10];
        closes.extend((0..10).map(|i| 101.0 + i as f64));
        closes.extend([95.0, 90.0, 120.0, 80.0]);
        let bars = make_bars(&closes);
        let cfg = small_config();
        let series = IndicatorSeries::compute(&bars, &cfg).unwrap();

        let mut stream = BacktestStream::new(&bars, &series, &cfg);
        let first: Vec<BacktestEvent> = stream.by_ref().collect();
        assert!(!first.is_empty());
        stream.restart();
        let second: Vec<BacktestEvent> = stream.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_stream_is_lazy() {
        let mut closes = vec![100.0; 10];
        closes.extend([110.0; 10]);
        let bars = make_bars(&closes);
        let cfg = small_config();
        let series = IndicatorSeries::compute(&bars, &cfg).unwrap();

        let mut stream = BacktestStream::new(&bars, &series, &cfg);
        let event = stream.next().unwrap();
        assert!(matches!(event, BacktestEvent::Signal(ref s) if s.signal_type == SignalType::Buy));
        assert!(stream.simulator().is_long());
        assert_eq!(stream.simulator().closed_trades().len(), 0);
    }

    #[test]
    fn test_open_position_marked_at_end() {
        let mut closes = vec![100.0; 10];
        closes.extend([110.0; 5]);
        let bars = make_bars(&closes);
        let res = run_backtest("ABC", &bars, &small_config()).unwrap();

        assert_eq!(res.trades.len(), 1);
        let open = &res.trades[0];
        assert_eq!(open.exit_reason, ExitReason::Open);
        assert_eq!(open.entry_price, 110.0);
        assert_eq!(open.mark_price, Some(110.0));

        let metrics = res.performance_metrics.unwrap();
        assert_eq!(metrics.total_trades, 0);
        assert!((metrics.final_value - 10_000.0).abs() < 1e-9);
        assert_eq!(res.equity_curve.len(), 1);
    }
}
