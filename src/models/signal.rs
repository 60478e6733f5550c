use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::trade::ExitReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
}

/// A BUY or SELL decision taken on a bar's close. At most one per bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub date: NaiveDate,
    pub signal_type: SignalType,
    pub price: f64,
    pub fast_ma: f64,
    pub slow_ma: f64,
    pub atr: f64,
    /// Initial stop for a BUY, prevailing stop for a SELL.
    pub trailing_stop: f64,
    pub confidence: f64,
    pub reasoning: String,
    /// Set on SELL signals only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
}

/// Informational stretch-above-fast-MA notice. Never changes position state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionAlert {
    pub date: NaiveDate,
    pub price: f64,
    pub fast_ma: f64,
    pub distance_percent: f64,
    pub reasoning: String,
}

/// A BUY that could not afford a single share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub date: NaiveDate,
    pub price: f64,
    pub available_capital: f64,
    pub capital_allocated: f64,
}
