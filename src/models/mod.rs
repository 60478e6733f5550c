pub mod bar;
pub mod config;
pub mod result;
pub mod signal;
pub mod symbol;
pub mod trade;
