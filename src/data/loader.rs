use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::bar::Bar;
use crate::models::symbol::SymbolBars;

use super::validator::validate_bars;

/// Accepted date layouts, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

/// Raw CSV row: `date,open,high,low,close[,volume]`. Headers may be lower, Title or UPPER case.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date", alias = "DATE")]
    date: String,
    #[serde(alias = "Open", alias = "OPEN")]
    open: f64,
    #[serde(alias = "High", alias = "HIGH")]
    high: f64,
    #[serde(alias = "Low", alias = "LOW")]
    low: f64,
    #[serde(alias = "Close", alias = "CLOSE")]
    close: f64,
    #[serde(default, alias = "Volume", alias = "VOLUME")]
    volume: Option<f64>,
}

/// Parse a date in any of the accepted layouts. Timestamps keep only the date part.
pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(trimmed);
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, fmt) {
            return Ok(date);
        }
    }
    Err(AppError::InvalidBars(format!("unrecognized date \"{}\"", raw)))
}

/// Read bars from any CSV source, sorted ascending by date, then validated.
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();
    for (i, record) in rdr.deserialize::<CsvRow>().enumerate() {
        let row = record?;
        let date = parse_date(&row.date).map_err(|e| AppError::CsvParse {
            row: i + 2,
            message: e.to_string(),
        })?;
        bars.push(Bar {
            date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.unwrap_or(0.0),
        });
    }

    bars.sort_by_key(|b| b.date);
    validate_bars(&bars)?;
    Ok(bars)
}

/// Load one symbol's bars from a CSV file.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, AppError> {
    let file = std::fs::File::open(path)
        .map_err(|e| AppError::FileRead(format!("{}: {}", path.display(), e)))?;
    let bars = read_bars(file)?;
    info!("Loaded {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

/// Symbol name implied by a file path: its upper-cased file stem.
pub fn symbol_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Load a symbol, named after its file.
pub fn load_symbol(path: &Path) -> Result<SymbolBars, AppError> {
    Ok(SymbolBars::new(symbol_from_path(path), load_bars_csv(path)?))
}
