use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Accepted bounds for user-supplied settings.
pub const MIN_INITIAL_CAPITAL: f64 = 1000.0;
pub const ATR_PERIOD_RANGE: RangeInclusive<usize> = 5..=50;
pub const ATR_MULTIPLIER_RANGE: RangeInclusive<f64> = 0.5..=5.0;

/// Moving average flavour used for both the fast and the slow line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaType {
    #[default]
    Ema,
    Sma,
}

impl MaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaType::Ema => "ema",
            MaType::Sma => "sma",
        }
    }

    /// Upper-case label used in signal reasoning.
    pub fn label(&self) -> &'static str {
        match self {
            MaType::Ema => "EMA",
            MaType::Sma => "SMA",
        }
    }
}

impl std::fmt::Display for MaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MaType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ema" => Ok(MaType::Ema),
            "sma" => Ok(MaType::Sma),
            _ => Err(AppError::InvalidConfig(format!(
                "ma_type must be \"ema\" or \"sma\", got \"{}\"",
                s
            ))),
        }
    }
}

/// Configuration for a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Keep only the most recent `days` bars (0 = all).
    pub days: usize,
    pub initial_capital: f64,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub ma_type: MaType,
    pub fast_period: usize,
    pub slow_period: usize,
    /// Percent of available capital committed per entry. `None` commits all of it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_sizing_percentage: Option<f64>,
    /// Close-above-fast-MA distance (percent) that raises a mean-reversion alert.
    pub mean_reversion_threshold: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            days: 0,
            initial_capital: 100_000.0,
            atr_period: 14,
            atr_multiplier: 2.0,
            ma_type: MaType::Ema,
            fast_period: 21,
            slow_period: 50,
            position_sizing_percentage: None,
            mean_reversion_threshold: 10.0,
        }
    }
}

impl BacktestConfig {
    /// Clone of this config evaluating a different MA pair.
    pub fn with_pair(&self, fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
            ..self.clone()
        }
    }

    /// Full validation for a single run, including the MA pair.
    pub fn validate(&self) -> Result<(), AppError> {
        self.validate_common()?;
        if self.fast_period == 0 {
            return Err(AppError::InvalidConfig("fast_period must be at least 1".into()));
        }
        if self.fast_period >= self.slow_period {
            return Err(AppError::InvalidPair {
                fast: self.fast_period,
                slow: self.slow_period,
            });
        }
        Ok(())
    }

    /// Validation of everything except the MA pair (the optimizer supplies its own pairs).
    pub fn validate_common(&self) -> Result<(), AppError> {
        if !self.initial_capital.is_finite() || self.initial_capital < MIN_INITIAL_CAPITAL {
            return Err(AppError::InvalidConfig(format!(
                "initial_capital must be at least {}, got {}",
                MIN_INITIAL_CAPITAL, self.initial_capital
            )));
        }
        if !ATR_PERIOD_RANGE.contains(&self.atr_period) {
            return Err(AppError::InvalidConfig(format!(
                "atr_period must be within [{}, {}], got {}",
                ATR_PERIOD_RANGE.start(),
                ATR_PERIOD_RANGE.end(),
                self.atr_period
            )));
        }
        if !ATR_MULTIPLIER_RANGE.contains(&self.atr_multiplier) {
            return Err(AppError::InvalidConfig(format!(
                "atr_multiplier must be within [{}, {}], got {}",
                ATR_MULTIPLIER_RANGE.start(),
                ATR_MULTIPLIER_RANGE.end(),
                self.atr_multiplier
            )));
        }
        if let Some(pct) = self.position_sizing_percentage {
            if !(pct > 0.0 && pct <= 100.0) {
                return Err(AppError::InvalidConfig(format!(
                    "position_sizing_percentage must be within (0, 100], got {}",
                    pct
                )));
            }
        }
        if !self.mean_reversion_threshold.is_finite() {
            return Err(AppError::InvalidConfig(
                "mean_reversion_threshold must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Bars needed before a run is meaningful: `max(fast, slow) + 1`.
    pub fn required_bars(&self) -> usize {
        self.fast_period.max(self.slow_period) + 1
    }
}

/// Inclusive integer range of MA periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub min: usize,
    pub max: usize,
}

impl PeriodRange {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn values(&self) -> RangeInclusive<usize> {
        self.min..=self.max
    }

    pub fn as_tuple(&self) -> (usize, usize) {
        (self.min, self.max)
    }
}

impl From<(usize, usize)> for PeriodRange {
    fn from((min, max): (usize, usize)) -> Self {
        Self { min, max }
    }
}

impl std::str::FromStr for PeriodRange {
    type Err = AppError;

    /// Parses `"min,max"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(AppError::InvalidConfig(format!(
                "range must look like \"min,max\", got \"{}\"",
                s
            )));
        }
        let parse = |p: &str| {
            p.parse::<usize>()
                .map_err(|_| AppError::InvalidConfig(format!("invalid period \"{}\"", p)))
        };
        Ok(Self {
            min: parse(parts[0])?,
            max: parse(parts[1])?,
        })
    }
}

/// Full optimization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub fast_range: PeriodRange,
    pub slow_range: PeriodRange,
    pub min_distance: usize,
    /// Shared settings for every evaluated pair; its own fast/slow periods are ignored.
    pub backtest: BacktestConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            fast_range: PeriodRange::new(5, 30),
            slow_range: PeriodRange::new(20, 100),
            min_distance: 10,
            backtest: BacktestConfig::default(),
        }
    }
}

impl OptimizationConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        self.backtest.validate_common()?;
        for (name, range) in [("fast_range", self.fast_range), ("slow_range", self.slow_range)] {
            if range.min == 0 {
                return Err(AppError::InvalidConfig(format!(
                    "{} periods must be at least 1",
                    name
                )));
            }
            if range.min > range.max {
                return Err(AppError::InvalidConfig(format!(
                    "invalid {}: min {} exceeds max {}",
                    name, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(BacktestConfig::default().validate().is_ok());
        assert!(OptimizationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_atr() {
        let cfg = BacktestConfig {
            atr_period: 4,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AppError::InvalidConfig(_))));

        let cfg = BacktestConfig {
            atr_multiplier: 5.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_small_capital() {
        let cfg = BacktestConfig {
            initial_capital: 999.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = BacktestConfig {
            initial_capital: -5.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_pair() {
        let cfg = BacktestConfig::default().with_pair(50, 21);
        assert!(matches!(
            cfg.validate(),
            Err(AppError::InvalidPair { fast: 50, slow: 21 })
        ));
    }

    #[test]
    fn test_position_sizing_bounds() {
        let mut cfg = BacktestConfig::default();
        cfg.position_sizing_percentage = Some(0.0);
        assert!(cfg.validate().is_err());
        cfg.position_sizing_percentage = Some(100.0);
        assert!(cfg.validate().is_ok());
        cfg.position_sizing_percentage = Some(100.1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_ma_type_and_range() {
        assert_eq!("SMA".parse::<MaType>().unwrap(), MaType::Sma);
        assert!("wma".parse::<MaType>().is_err());
        assert_eq!("5, 30".parse::<PeriodRange>().unwrap(), PeriodRange::new(5, 30));
        assert!("5".parse::<PeriodRange>().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let cfg: BacktestConfig =
            serde_json::from_str(r#"{"ma_type": "sma", "fast_period": 10}"#).unwrap();
        assert_eq!(cfg.ma_type, MaType::Sma);
        assert_eq!(cfg.fast_period, 10);
        assert_eq!(cfg.slow_period, 50);
        assert_eq!(cfg.atr_period, 14);
    }
}
