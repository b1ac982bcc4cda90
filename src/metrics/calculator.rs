//! Calculator for portfolio performance: returns, volatility, Sharpe, drawdown, trade stats.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{PerformanceMetrics, TradeIntent};

/// One valuation of the portfolio.
pub type EquityPoint = (NaiveDate, Decimal);

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;

/// Computes `PerformanceMetrics` from an equity curve and the trades behind it.
#[derive(Debug, Clone)]
pub struct PerformanceCalculator {
    /// Annual risk-free rate for the Sharpe ratio (0.02 = 2%)
    pub risk_free_rate: f64,
}

impl Default for PerformanceCalculator {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
        }
    }
}

impl PerformanceCalculator {
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    /// Calculate metrics. `equity` must be in date order, starting with the
    /// initial capital.
    pub fn calculate(&self, equity: &[EquityPoint], trades: &[TradeIntent]) -> PerformanceMetrics {
        let mut metrics = PerformanceMetrics {
            periods: equity.len(),
            ..Default::default()
        };

        self.calculate_return_metrics(&mut metrics, equity);
        Self::calculate_drawdown(&mut metrics, equity);
        Self::calculate_trade_metrics(&mut metrics, trades);

        // Calmar ratio (annualized return / max drawdown)
        if metrics.max_drawdown > 0.0 {
            metrics.calmar_ratio = metrics.annualized_return / metrics.max_drawdown;
        }

        metrics
    }

    fn calculate_return_metrics(&self, metrics: &mut PerformanceMetrics, equity: &[EquityPoint]) {
        let (Some(first), Some(last)) = (equity.first(), equity.last()) else {
            return;
        };

        let initial = first.1.to_f64().unwrap_or(0.0);
        let final_value = last.1.to_f64().unwrap_or(0.0);
        if initial <= 0.0 {
            return;
        }

        let growth = final_value / initial;
        metrics.total_return = growth - 1.0;

        let years = (last.0 - first.0).num_days() as f64 / DAYS_PER_YEAR;
        if years > 0.0 && growth > 0.0 {
            metrics.annualized_return = growth.powf(1.0 / years) - 1.0;
        }

        // Period-over-period returns
        let returns: Vec<f64> = equity
            .windows(2)
            .filter_map(|w| {
                let prev = w[0].1.to_f64()?;
                let curr = w[1].1.to_f64()?;
                (prev > 0.0).then(|| curr / prev - 1.0)
            })
            .collect();

        if returns.len() > 1 {
            let std_dev = returns.std_dev();
            if std_dev.is_finite() {
                metrics.volatility = std_dev * TRADING_DAYS_PER_YEAR.sqrt();
            }
        }

        if metrics.volatility > 0.0 {
            metrics.sharpe_ratio = (metrics.annualized_return - self.risk_free_rate) / metrics.volatility;
        }
    }

    /// Maximum peak-to-trough decline of the curve.
    fn calculate_drawdown(metrics: &mut PerformanceMetrics, equity: &[EquityPoint]) {
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;
        let mut max_dd_pct = 0.0f64;

        for (_, value) in equity {
            if *value > peak {
                peak = *value;
            }

            if peak > Decimal::ZERO {
                let dd = peak - value;
                if dd > max_dd {
                    max_dd = dd;
                }

                let dd_pct = (dd / peak).to_f64().unwrap_or(0.0);
                if dd_pct > max_dd_pct {
                    max_dd_pct = dd_pct;
                }
            }
        }

        metrics.max_drawdown = max_dd_pct;
        metrics.max_drawdown_value = max_dd;
    }

    /// Win/loss statistics over exits with a realized P&L.
    fn calculate_trade_metrics(metrics: &mut PerformanceMetrics, trades: &[TradeIntent]) {
        let pnls: Vec<Decimal> = trades
            .iter()
            .filter(|t| !t.is_buy())
            .filter_map(|t| t.realized_pnl)
            .collect();

        if pnls.is_empty() {
            return;
        }

        let (wins, losses): (Vec<Decimal>, Vec<Decimal>) =
            pnls.iter().partition(|&&p| p > Decimal::ZERO);
        let losses: Vec<Decimal> = losses.into_iter().filter(|p| *p < Decimal::ZERO).collect();

        metrics.closing_trades = pnls.len() as u32;
        metrics.winning_trades = wins.len() as u32;
        metrics.losing_trades = losses.len() as u32;
        metrics.win_rate = wins.len() as f64 / pnls.len() as f64;

        metrics.total_realized_pnl = pnls.iter().copied().sum();
        metrics.avg_realized_pnl = metrics.total_realized_pnl / Decimal::from(pnls.len() as u32);

        // Profit factor
        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();
        if gross_loss > Decimal::ZERO {
            metrics.profit_factor = (gross_profit / gross_loss).to_f64().unwrap_or(0.0);
        }
    }
}
