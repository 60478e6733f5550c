use crate::models::bar::Bar;
use crate::models::config::BacktestConfig;
use crate::models::signal::{MeanReversionAlert, Signal, SignalType};
use crate::models::trade::ExitReason;

const MAX_CONFIDENCE: f64 = 0.9;

/// What the signal generator needs to know about the simulator on a given bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionView {
    Flat,
    /// Long with the stop already ratcheted for this bar.
    Long { trailing_stop: f64 },
}

/// Indicator readings on one bar, all defined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarIndicators {
    pub fast_ma: f64,
    pub slow_ma: f64,
    pub atr: f64,
}

/// Everything the generator emits for a single bar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSignals {
    pub signal: Option<Signal>,
    pub alert: Option<MeanReversionAlert>,
}

/// First bar index on which signals may be evaluated.
pub fn first_signal_index(config: &BacktestConfig) -> usize {
    config.slow_period.max(config.atr_period)
}

/// Evaluate one bar. Pure: same inputs, same output.
pub fn evaluate_bar(
    bar: &Bar,
    ind: BarIndicators,
    position: PositionView,
    config: &BacktestConfig,
) -> BarSignals {
    let signal = match position {
        PositionView::Flat => entry_signal(bar, ind, config),
        PositionView::Long { trailing_stop } => exit_signal(bar, ind, trailing_stop, config),
    };
    BarSignals {
        signal,
        alert: mean_reversion_alert(bar, ind.fast_ma, config),
    }
}

/// Exit rule with strict priority: trailing stop, then fast MA, then slow MA.
pub fn exit_reason(close: f64, trailing_stop: f64, fast_ma: f64, slow_ma: f64) -> Option<ExitReason> {
    if close <= trailing_stop {
        Some(ExitReason::TrailingStop)
    } else if close < fast_ma {
        Some(ExitReason::MaSignal)
    } else if close < slow_ma {
        Some(ExitReason::TrendBreak)
    } else {
        None
    }
}

/// Percent distance of `close` above `ma`.
pub fn distance_percent(close: f64, ma: f64) -> f64 {
    (close - ma) / ma * 100.0
}

fn confidence(close: f64, ma: f64) -> f64 {
    ((close - ma).abs() / ma * 10.0).min(MAX_CONFIDENCE)
}

fn entry_signal(bar: &Bar, ind: BarIndicators, config: &BacktestConfig) -> Option<Signal> {
    if bar.close <= ind.slow_ma {
        return None;
    }
    let label = config.ma_type.label();
    Some(Signal {
        date: bar.date,
        signal_type: SignalType::Buy,
        price: bar.close,
        fast_ma: ind.fast_ma,
        slow_ma: ind.slow_ma,
        atr: ind.atr,
        trailing_stop: bar.close - ind.atr * config.atr_multiplier,
        confidence: confidence(bar.close, ind.slow_ma),
        reasoning: format!(
            "Entry: price {:.2} closed above {} {} {:.2}",
            bar.close, config.slow_period, label, ind.slow_ma
        ),
        exit_reason: None,
    })
}

fn exit_signal(
    bar: &Bar,
    ind: BarIndicators,
    trailing_stop: f64,
    config: &BacktestConfig,
) -> Option<Signal> {
    let reason = exit_reason(bar.close, trailing_stop, ind.fast_ma, ind.slow_ma)?;
    let label = config.ma_type.label();
    let reasoning = match reason {
        ExitReason::TrailingStop => format!(
            "Price {:.2} hit trailing stop {:.2}",
            bar.close, trailing_stop
        ),
        ExitReason::MaSignal => format!(
            "Price {:.2} closed below {} {} {:.2}",
            bar.close, config.fast_period, label, ind.fast_ma
        ),
        ExitReason::TrendBreak => format!(
            "Major trend break: price {:.2} closed below {} {} {:.2}",
            bar.close, config.slow_period, label, ind.slow_ma
        ),
        ExitReason::Open => format!("Position open at {:.2}", bar.close),
    };
    Some(Signal {
        date: bar.date,
        signal_type: SignalType::Sell,
        price: bar.close,
        fast_ma: ind.fast_ma,
        slow_ma: ind.slow_ma,
        atr: ind.atr,
        trailing_stop,
        confidence: confidence(bar.close, ind.fast_ma),
        reasoning,
        exit_reason: Some(reason),
    })
}

fn mean_reversion_alert(bar: &Bar, fast_ma: f64, config: &BacktestConfig) -> Option<MeanReversionAlert> {
    let distance = distance_percent(bar.close, fast_ma);
    if distance.is_nan() || distance <= config.mean_reversion_threshold {
        return None;
    }
    Some(MeanReversionAlert {
        date: bar.date,
        price: bar.close,
        fast_ma,
        distance_percent: distance,
        reasoning: format!(
            "Price {:.2} is {:.1}% above {} {} {:.2}; extended, pullback likely",
            bar.close,
            distance,
            config.fast_period,
            config.ma_type.label(),
            fast_ma
        ),
    })
}
