//! Portfolio performance metrics: returns, volatility, drawdown and trade statistics.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Performance of a portfolio over an equity curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // === Returns ===
    /// Total return (0.10 = +10%)
    pub total_return: f64,

    /// Compound annual return over 365.25-day years
    pub annualized_return: f64,

    /// Annualized standard deviation of daily returns
    pub volatility: f64,

    // === Risk ===
    /// Annualized Sharpe ratio against the configured risk-free rate
    pub sharpe_ratio: f64,

    /// Maximum peak-to-trough decline (0.0 to 1.0)
    pub max_drawdown: f64,

    /// Maximum drawdown in currency terms
    pub max_drawdown_value: Decimal,

    /// Annualized return / max drawdown
    pub calmar_ratio: f64,

    /// Number of valuation points in the curve
    pub periods: usize,

    // === Closed trades ===
    /// Exits with a realized P&L
    pub closing_trades: u32,

    pub winning_trades: u32,

    pub losing_trades: u32,

    /// Winning exits / all exits (0.0 to 1.0)
    pub win_rate: f64,

    /// Mean realized P&L per exit
    pub avg_realized_pnl: Decimal,

    /// Gross profit / gross loss
    pub profit_factor: f64,

    pub total_realized_pnl: Decimal,
}
