//! Performance metrics over equity curves and realized trades.

mod calculator;

pub use calculator::{EquityPoint, PerformanceCalculator};
