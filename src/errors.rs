use serde::{Deserialize, Serialize};

/// All application errors, categorized by domain.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Data / Import ──
    #[error("Invalid bar data: {0}")]
    InvalidBars(String),

    #[error("CSV parse error at row {row}: {message}")]
    CsvParse { row: usize, message: String },

    #[error("Failed to read file: {0}")]
    FileRead(String),

    #[error("Failed to write file: {0}")]
    FileWrite(String),

    // ── Backtest ──
    #[error("Insufficient data: need {needed} bars, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Invalid MA pair: fast period {fast} must be below slow period {slow}")]
    InvalidPair { fast: usize, slow: usize },

    // ── Optimization ──
    #[error(
        "No candidate pairs: fast {fast_range:?}, slow {slow_range:?} with min distance {min_distance}"
    )]
    InvalidParameterRange {
        fast_range: (usize, usize),
        slow_range: (usize, usize),
        min_distance: usize,
    },

    #[error("Optimization cancelled")]
    OptimizationCancelled,

    #[error("No symbols supplied")]
    EmptyUniverse,

    // ── Configuration ──
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Serialization ──
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ── General ──
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable error record carried inside result payloads.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl AppError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidBars(_) => "INVALID_BARS",
            AppError::CsvParse { .. } => "CSV_PARSE_ERROR",
            AppError::FileRead(_) => "FILE_READ",
            AppError::FileWrite(_) => "FILE_WRITE",
            AppError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            AppError::InvalidPair { .. } => "INVALID_PAIR",
            AppError::InvalidParameterRange { .. } => "INVALID_PARAMETER_RANGE",
            AppError::OptimizationCancelled => "OPTIMIZATION_CANCELLED",
            AppError::EmptyUniverse => "EMPTY_UNIVERSE",
            AppError::InvalidConfig(_) => "INVALID_CONFIG",
            AppError::Serialization(_) => "SERIALIZATION",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// Lets AppError travel inside serialized results.
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let response = ErrorResponse::from(self);
        response.serialize(serializer)
    }
}

// ── Conversions from external errors ──

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileRead(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        let row = err
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or_default();
        AppError::CsvParse {
            row,
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for AppError {
    fn from(err: chrono::ParseError) -> Self {
        AppError::InvalidBars(format!("bad date: {}", err))
    }
}
