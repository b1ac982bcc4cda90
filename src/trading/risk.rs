//! Capital-at-risk accounting.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{ExitStage, Portfolio};

/// Exposure of one position to its active stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRisk {
    pub ticker: String,
    pub stage: ExitStage,
    pub shares: u64,
    pub current_price: Decimal,
    pub active_stop: Decimal,

    /// max(0, shares × (price − active stop))
    pub capital_at_risk: Decimal,

    /// Price distance to the active stop as a fraction of price; negative below the stop
    pub distance_to_stop_pct: Decimal,
}

/// Portfolio-wide capital at risk. Reporting only; acting on it is up to
/// the caller (or `RiskConfig::max_portfolio_risk_pct`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskReport {
    pub positions: Vec<PositionRisk>,
    pub total_value: Decimal,
    pub capital_at_risk: Decimal,
    pub capital_at_risk_pct: Decimal,
}

impl RiskReport {
    pub fn for_portfolio(portfolio: &Portfolio) -> Self {
        let positions: Vec<PositionRisk> = portfolio
            .positions
            .values()
            .map(|pos| {
                let active_stop = pos.active_stop();
                let distance_to_stop_pct = if pos.current_price > Decimal::ZERO {
                    (pos.current_price - active_stop) / pos.current_price
                } else {
                    Decimal::ZERO
                };
                PositionRisk {
                    ticker: pos.ticker.clone(),
                    stage: pos.stage(),
                    shares: pos.shares,
                    current_price: pos.current_price,
                    active_stop,
                    capital_at_risk: pos.capital_at_risk(),
                    distance_to_stop_pct,
                }
            })
            .collect();

        let capital_at_risk: Decimal = positions.iter().map(|p| p.capital_at_risk).sum();
        let total_value = portfolio.total_value();
        let capital_at_risk_pct = if total_value > Decimal::ZERO {
            capital_at_risk / total_value
        } else {
            Decimal::ZERO
        };

        Self {
            positions,
            total_value,
            capital_at_risk,
            capital_at_risk_pct,
        }
    }

    /// Whether the portfolio is above a risk cap (fraction of total value).
    pub fn exceeds(&self, cap: Decimal) -> bool {
        self.capital_at_risk_pct > cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[test]
    fn test_report() {
        let mut half = Position::new("MSFT", 20, dec!(50), dec!(45), dec!(60), dec!(2.5));
        half.reduce(10);
        half.move_stop_to_breakeven();
        half.update_price(dec!(62));

        let mut under = Position::new("TSLA", 10, dec!(200), dec!(180), dec!(240), dec!(10));
        under.update_price(dec!(175));

        let portfolio = Portfolio::new("demo", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(), dec!(3630))
            .with_position(Position::new("AAPL", 50, dec!(100), dec!(96), dec!(108), dec!(2)))
            .with_position(half)
            .with_position(under);

        let report = RiskReport::for_portfolio(&portfolio);

        // AAPL 50 × 4, MSFT 10 × 12 at breakeven, TSLA below its stop
        assert_eq!(report.capital_at_risk, dec!(320));
        assert_eq!(report.total_value, dec!(11000));
        assert_eq!(report.positions.len(), 3);

        let tsla = report.positions.iter().find(|p| p.ticker == "TSLA").unwrap();
        assert_eq!(tsla.capital_at_risk, Decimal::ZERO);
        assert!(tsla.distance_to_stop_pct < Decimal::ZERO);

        let msft = report.positions.iter().find(|p| p.ticker == "MSFT").unwrap();
        assert_eq!(msft.stage, ExitStage::HalfClosed);
        assert_eq!(msft.active_stop, dec!(50));

        assert!(report.exceeds(dec!(0.02)));
        assert!(!report.exceeds(dec!(0.05)));
    }

    #[test]
    fn test_empty_portfolio() {
        let portfolio = Portfolio::new("empty", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(), dec!(0));
        let report = RiskReport::for_portfolio(&portfolio);
        assert_eq!(report.capital_at_risk, Decimal::ZERO);
        assert_eq!(report.capital_at_risk_pct, Decimal::ZERO);
    }
}
