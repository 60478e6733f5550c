use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::AppError;
use crate::models::bar::{closes, Bar};
use crate::models::config::{BacktestConfig, MaType};

/// Fast MA, slow MA and ATR aligned to bar indices. NaN marks warm-up.
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub fast_ma: Arc<Vec<f64>>,
    pub slow_ma: Arc<Vec<f64>>,
    pub atr: Arc<Vec<f64>>,
}

impl IndicatorSeries {
    /// Compute all three series for one run.
    pub fn compute(bars: &[Bar], config: &BacktestConfig) -> Result<Self, AppError> {
        IndicatorCache::new(bars, config.atr_period)?.series(config.ma_type, config.fast_period, config.slow_period)
    }

    pub fn len(&self) -> usize {
        self.atr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atr.is_empty()
    }

    /// `(fast, slow, atr)` at `i`, or `None` while any of them is still warming up.
    pub fn values_at(&self, i: usize) -> Option<(f64, f64, f64)> {
        let fast = *self.fast_ma.get(i)?;
        let slow = *self.slow_ma.get(i)?;
        let atr = *self.atr.get(i)?;
        if fast.is_nan() || slow.is_nan() || atr.is_nan() {
            return None;
        }
        Some((fast, slow, atr))
    }
}

/// Moving averages shared across optimizer workers, keyed by `(MaType, period)`.
/// ATR is computed once since every pair uses the same ATR period.
#[derive(Debug)]
pub struct IndicatorCache {
    closes: Vec<f64>,
    atr: Arc<Vec<f64>>,
    ma: DashMap<(MaType, usize), Arc<Vec<f64>>>,
}

impl IndicatorCache {
    pub fn new(bars: &[Bar], atr_period: usize) -> Result<Self, AppError> {
        if atr_period == 0 {
            return Err(AppError::InvalidConfig("atr_period must be at least 1".into()));
        }
        Ok(Self {
            closes: closes(bars),
            atr: Arc::new(atr(bars, atr_period)),
            ma: DashMap::new(),
        })
    }

    /// Get or compute the MA series for `period`.
    pub fn ma(&self, ma_type: MaType, period: usize) -> Arc<Vec<f64>> {
        self.ma
            .entry((ma_type, period))
            .or_insert_with(|| Arc::new(compute_ma(ma_type, &self.closes, period)))
            .clone()
    }

    pub fn series(
        &self,
        ma_type: MaType,
        fast_period: usize,
        slow_period: usize,
    ) -> Result<IndicatorSeries, AppError> {
        if fast_period == 0 || slow_period == 0 {
            return Err(AppError::InvalidConfig("MA periods must be at least 1".into()));
        }
        Ok(IndicatorSeries {
            fast_ma: self.ma(ma_type, fast_period),
            slow_ma: self.ma(ma_type, slow_period),
            atr: Arc::clone(&self.atr),
        })
    }

    /// Number of distinct MA series computed so far.
    pub fn cached_series(&self) -> usize {
        self.ma.len()
    }
}

/// Dispatch on the configured MA flavour.
pub fn compute_ma(ma_type: MaType, data: &[f64], period: usize) -> Vec<f64> {
    match ma_type {
        MaType::Ema => ema(data, period),
        MaType::Sma => sma(data, period),
    }
}

// ── SMA ──

/// Simple Moving Average. First `period-1` values are NaN.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let len = data.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || len < period {
        return result;
    }
    let mut sum: f64 = data[..period].iter().sum();
    result[period - 1] = sum / period as f64;
    for i in period..len {
        sum += data[i] - data[i - period];
        result[i] = sum / period as f64;
    }
    result
}

// ── EMA ──

/// Recursive Exponential Moving Average with no seeding window:
/// `EMA[0] = data[0]`, then `EMA[t] = α·data[t] + (1-α)·EMA[t-1]`, `α = 2/(period+1)`.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let len = data.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || len == 0 {
        return result;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    result[0] = data[0];
    for i in 1..len {
        result[i] = alpha * data[i] + (1.0 - alpha) * result[i - 1];
    }
    result
}

// ── ATR ──

/// True Range per bar. The first bar has no previous close, so it is `high - low`.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let hl = bar.high - bar.low;
        if i == 0 {
            tr.push(hl);
            continue;
        }
        let prev_close = bars[i - 1].close;
        let hc = (bar.high - prev_close).abs();
        let lc = (bar.low - prev_close).abs();
        tr.push(hl.max(hc).max(lc));
    }
    tr
}

/// Average True Range as a simple rolling mean of True Range.
/// The first `period` values are NaN.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let len = bars.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || len <= period {
        return result;
    }
    let tr = true_range(bars);
    let mut sum: f64 = tr[1..=period].iter().sum();
    result[period] = sum / period as f64;
    for i in (period + 1)..len {
        sum += tr[i] - tr[i - period];
        result[i] = sum / period as f64;
    }
    result
}

// ══════════════════════════════════════════════════════════════
// Tests
// ══════════════════════════════════════════════════════════════
