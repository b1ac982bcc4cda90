//! Data models for signals, positions, portfolios, trade intents and metrics.

mod metrics;
mod portfolio;
mod position;
mod signal;
mod trade;

pub use metrics::PerformanceMetrics;
pub use portfolio::Portfolio;
pub use position::{ExitOrder, ExitStage, Position};
pub use signal::{Signal, SignalAction};
pub use trade::{TradeIntent, TradeReason, TradeSide};
