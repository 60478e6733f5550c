pub mod cross_symbol;
pub mod executor;
pub mod indicators;
pub mod metrics;
pub mod optimizer;
pub mod position;
pub mod signals;
