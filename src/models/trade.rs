use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Why a trade left the market.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    MaSignal,
    TrailingStop,
    TrendBreak,
    /// Still held when the data ran out.
    Open,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::MaSignal => "MA_SIGNAL",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::TrendBreak => "TREND_BREAK",
            ExitReason::Open => "OPEN",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long trade. Exit fields are `None` while `exit_reason == Open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<f64>,
    pub shares: u64,
    pub exit_reason: ExitReason,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub duration_days: Option<i64>,
    /// Last close, for a trade still open at end of data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<f64>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit_reason != ExitReason::Open
    }

    /// Realized P&L, or 0 for an open trade.
    pub fn realized_pnl(&self) -> f64 {
        self.pnl.unwrap_or(0.0)
    }
}
