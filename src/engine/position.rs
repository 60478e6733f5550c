use chrono::NaiveDate;

use crate::models::bar::Bar;
use crate::models::signal::SkippedEntry;
use crate::models::trade::{ExitReason, Trade};

/// A long position being tracked during backtest execution.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub entry_date: NaiveDate,
    pub entry_index: usize,
    pub entry_price: f64,
    pub shares: u64,
    /// Highest close since entry, including the entry bar.
    pub highest_close: f64,
    /// Ratcheting stop. Never decreases while the position is open.
    pub trailing_stop: f64,
}

/// Simulator state. Exactly one of these holds at any simulated time.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Long(OpenPosition),
}

/// Single-account, long-only trade simulator.
///
/// Owns the open position (if any), the pooled capital and every closed trade.
/// Each run gets its own instance, so parallel runs never share state.
#[derive(Debug, Clone)]
pub struct TradeSimulator {
    state: PositionState,
    initial_capital: f64,
    available_capital: f64,
    atr_multiplier: f64,
    position_sizing_percentage: Option<f64>,
    trades: Vec<Trade>,
}

impl TradeSimulator {
    pub fn new(
        initial_capital: f64,
        atr_multiplier: f64,
        position_sizing_percentage: Option<f64>,
    ) -> Self {
        Self {
            state: PositionState::Flat,
            initial_capital,
            available_capital: initial_capital,
            atr_multiplier,
            position_sizing_percentage,
            trades: Vec::new(),
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        match &self.state {
            PositionState::Long(pos) => Some(pos),
            PositionState::Flat => None,
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self.state, PositionState::Long(_))
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn available_capital(&self) -> f64 {
        self.available_capital
    }

    pub fn atr_multiplier(&self) -> f64 {
        self.atr_multiplier
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Capital committed to a new entry.
    pub fn capital_to_allocate(&self) -> f64 {
        match self.position_sizing_percentage {
            Some(pct) => self.available_capital * pct / 100.0,
            None => self.available_capital,
        }
    }

    /// FLAT → LONG at `bar.close`. Returns the skipped entry instead when
    /// the allocation cannot buy a single share; the state stays FLAT.
    pub fn enter(&mut self, index: usize, bar: &Bar, atr: f64) -> Result<OpenPosition, SkippedEntry> {
        let capital_allocated = self.capital_to_allocate();
        let shares = calculate_shares(capital_allocated, bar.close);
        if shares == 0 || self.is_long() {
            return Err(SkippedEntry {
                date: bar.date,
                price: bar.close,
                available_capital: self.available_capital,
                capital_allocated,
            });
        }

        let position = OpenPosition {
            entry_date: bar.date,
            entry_index: index,
            entry_price: bar.close,
            shares,
            highest_close: bar.close,
            trailing_stop: initial_stop(bar.close, atr, self.atr_multiplier),
        };
        self.state = PositionState::Long(position.clone());
        Ok(position)
    }

    /// Ratchet the trailing stop on a bar after entry. Returns the prevailing stop.
    pub fn update_stop(&mut self, close: f64, atr: f64) -> Option<f64> {
        let multiplier = self.atr_multiplier;
        match &mut self.state {
            PositionState::Long(pos) => {
                update_trailing_stop(pos, close, atr, multiplier);
                Some(pos.trailing_stop)
            }
            PositionState::Flat => None,
        }
    }

    /// LONG → FLAT at `bar.close`. Realized P&L goes back into the pooled account.
    pub fn exit(&mut self, bar: &Bar, reason: ExitReason) -> Option<&Trade> {
        let pos = match std::mem::take(&mut self.state) {
            PositionState::Long(pos) => pos,
            PositionState::Flat => return None,
        };
        let trade = close_position(&pos, bar, reason);
        self.available_capital += trade.realized_pnl();
        self.trades.push(trade);
        self.trades.last()
    }

    /// The still-open position at end of data, marked at `last_bar.close`.
    pub fn open_trade(&self, last_bar: &Bar) -> Option<Trade> {
        self.position().map(|pos| mark_open_position(pos, last_bar))
    }

    /// Pooled capital plus the unrealized P&L of any open position at `last_close`.
    pub fn final_value(&self, last_close: f64) -> f64 {
        let unrealized = self
            .position()
            .map(|pos| (last_close - pos.entry_price) * pos.shares as f64)
            .unwrap_or(0.0);
        self.available_capital + unrealized
    }

    /// Hand back every closed trade, consuming the simulator.
    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }
}

/// Whole shares affordable with `capital` at `price`.
pub fn calculate_shares(capital: f64, price: f64) -> u64 {
    if price.is_nan() || capital.is_nan() || price <= 0.0 || capital <= 0.0 {
        return 0;
    }
    (capital / price).floor() as u64
}

/// Stop placed at entry: `entry − atr × multiplier`.
pub fn initial_stop(entry_price: f64, atr: f64, multiplier: f64) -> f64 {
    entry_price - atr * multiplier
}

/// Raise the highest close and ratchet the stop. The stop never moves down.
pub fn update_trailing_stop(position: &mut OpenPosition, close: f64, atr: f64, multiplier: f64) {
    if close > position.highest_close {
        position.highest_close = close;
    }
    let candidate = position.highest_close - atr * multiplier;
    if candidate > position.trailing_stop {
        position.trailing_stop = candidate;
    }
}

/// Close a position and create a Trade.
fn close_position(pos: &OpenPosition, exit_bar: &Bar, reason: ExitReason) -> Trade {
    let exit_price = exit_bar.close;
    let pnl = (exit_price - pos.entry_price) * pos.shares as f64;
    let pnl_percent = (exit_price / pos.entry_price - 1.0) * 100.0;
    Trade {
        entry_date: pos.entry_date,
        entry_price: pos.entry_price,
        exit_date: Some(exit_bar.date),
        exit_price: Some(exit_price),
        shares: pos.shares,
        exit_reason: reason,
        pnl: Some(pnl),
        pnl_percent: Some(pnl_percent),
        duration_days: Some((exit_bar.date - pos.entry_date).num_days()),
        mark_price: None,
        unrealized_pnl: None,
    }
}

fn mark_open_position(pos: &OpenPosition, last_bar: &Bar) -> Trade {
    Trade {
        entry_date: pos.entry_date,
        entry_price: pos.entry_price,
        exit_date: None,
        exit_price: None,
        shares: pos.shares,
        exit_reason: ExitReason::Open,
        pnl: None,
        pnl_percent: None,
        duration_days: None,
        mark_price: Some(last_bar.close),
        unrealized_pnl: Some((last_bar.close - pos.entry_price) * pos.shares as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn test_shares_are_floored() {
        assert_eq!(calculate_shares(10_000.0, 33.0), 303);
        assert_eq!(calculate_shares(50.0, 100.0), 0);
        assert_eq!(calculate_shares(1000.0, 0.0), 0);
    }

    #[test]
    fn test_enter_uses_sizing_percentage() {
        let mut sim = TradeSimulator::new(10_000.0, 2.0, Some(25.0));
        let pos = sim.enter(5, &bar(1, 100.0), 3.0).unwrap();
        assert_eq!(pos.shares, 25);
        assert_eq!(pos.entry_index, 5);
        assert!((pos.trailing_stop - 94.0).abs() < 1e-12);
        assert!(sim.is_long());
    }

    #[test]
    fn test_enter_skips_when_unaffordable() {
        let mut sim = TradeSimulator::new(1_000.0, 2.0, Some(5.0));
        let skipped = sim.enter(0, &bar(1, 100.0), 1.0).unwrap_err();
        assert_eq!(skipped.capital_allocated, 50.0);
        assert_eq!(skipped.available_capital, 1_000.0);
        assert!(!sim.is_long());
    }

    #[test]
    fn test_trailing_stop_ratchets_up_only() {
        let mut sim = TradeSimulator::new(10_000.0, 2.0, None);
        sim.enter(0, &bar(1, 100.0), 5.0).unwrap();
        assert_eq!(sim.update_stop(110.0, 5.0), Some(100.0));
        // Volatility expansion would lower the stop; it holds instead.
        assert_eq!(sim.update_stop(108.0, 20.0), Some(100.0));
        assert_eq!(sim.update_stop(120.0, 2.0), Some(116.0));
        assert_eq!(sim.position().unwrap().highest_close, 120.0);
    }

    #[test]
    fn test_exit_pools_capital() {
        let mut sim = TradeSimulator::new(10_000.0, 2.0, None);
        sim.enter(0, &bar(1, 100.0), 5.0).unwrap();
        let trade = sim.exit(&bar(11, 110.0), ExitReason::MaSignal).unwrap().clone();
        assert_eq!(trade.shares, 100);
        assert_eq!(trade.pnl, Some(1_000.0));
        assert!((trade.pnl_percent.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(trade.duration_days, Some(10));
        assert_eq!(sim.available_capital(), 11_000.0);
        assert!(!sim.is_long());
        assert!(sim.exit(&bar(12, 110.0), ExitReason::MaSignal).is_none());
    }

    #[test]
    fn test_open_trade_is_marked() {
        let mut sim = TradeSimulator::new(10_000.0, 2.0, None);
        sim.enter(0, &bar(1, 100.0), 5.0).unwrap();
        let last = bar(20, 95.0);
        let open = sim.open_trade(&last).unwrap();
        assert_eq!(open.exit_reason, ExitReason::Open);
        assert_eq!(open.unrealized_pnl, Some(-500.0));
        assert_eq!(sim.final_value(last.close), 9_500.0);
        assert!(sim.closed_trades().is_empty());
    }
}
