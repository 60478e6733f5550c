use crate::errors::AppError;
use crate::models::bar::Bar;

/// Check the input contract: strictly ascending dates, finite prices,
/// positive closes and `low <= high`.
pub fn validate_bars(bars: &[Bar]) -> Result<(), AppError> {
    for (i, bar) in bars.iter().enumerate() {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite()) || !bar.volume.is_finite() {
            return Err(AppError::InvalidBars(format!(
                "non-finite value in bar {} ({})",
                i, bar.date
            )));
        }
        if bar.close <= 0.0 {
            return Err(AppError::InvalidBars(format!(
                "non-positive close {} on {}",
                bar.close, bar.date
            )));
        }
        if bar.low > bar.high {
            return Err(AppError::InvalidBars(format!(
                "low {} above high {} on {}",
                bar.low, bar.high, bar.date
            )));
        }
        if i > 0 {
            let prev = &bars[i - 1];
            if bar.date == prev.date {
                return Err(AppError::InvalidBars(format!("duplicate date {}", bar.date)));
            }
            if bar.date < prev.date {
                return Err(AppError::InvalidBars(format!(
                    "dates out of order: {} follows {}",
                    bar.date, prev.date
                )));
            }
        }
    }
    Ok(())
}
