use serde::{Deserialize, Serialize};

use super::bar::Bar;

/// One symbol's bar history, as handed over by the data collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolBars {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl SymbolBars {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            bars,
        }
    }
}
