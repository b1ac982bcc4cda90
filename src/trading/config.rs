//! Risk configuration.

use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};

/// Configuration for position sizing, exits and slot allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum number of concurrent positions
    pub max_positions: usize,

    /// Fraction of portfolio value risked on one entry (0.02 = 2%)
    pub risk_pct_per_trade: Decimal,

    /// Stop distance in ATR units
    pub stop_atr_multiple: Decimal,

    /// First target distance in multiples of the initial risk
    pub profit_ratio: Decimal,

    /// Fraction of portfolio value kept as cash; entries never spend below it
    pub cash_buffer_pct: Decimal,

    /// Skip all entries when capital at risk exceeds this fraction of portfolio value
    pub max_portfolio_risk_pct: Option<Decimal>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            risk_pct_per_trade: dec!(0.02),  // 2% per trade
            stop_atr_multiple: dec!(2),      // stop 2 ATR below entry
            profit_ratio: dec!(2),           // first target at 2R
            cash_buffer_pct: dec!(0.10),     // keep 10% in cash
            max_portfolio_risk_pct: None,
        }
    }
}

impl RiskConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RiskConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that make sizing meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_positions < 1 {
            return Err(RiskError::InvalidConfig(
                "max_positions must be at least 1".to_string(),
            ));
        }
        if self.risk_pct_per_trade <= Decimal::ZERO || self.risk_pct_per_trade > Decimal::ONE {
            return Err(RiskError::InvalidConfig(format!(
                "risk_pct_per_trade must be in (0, 1], got {}",
                self.risk_pct_per_trade
            )));
        }
        if self.stop_atr_multiple <= Decimal::ZERO {
            return Err(RiskError::InvalidConfig(format!(
                "stop_atr_multiple must be positive, got {}",
                self.stop_atr_multiple
            )));
        }
        if self.profit_ratio <= Decimal::ZERO {
            return Err(RiskError::InvalidConfig(format!(
                "profit_ratio must be positive, got {}",
                self.profit_ratio
            )));
        }
        if self.cash_buffer_pct < Decimal::ZERO || self.cash_buffer_pct >= Decimal::ONE {
            return Err(RiskError::InvalidConfig(format!(
                "cash_buffer_pct must be in [0, 1), got {}",
                self.cash_buffer_pct
            )));
        }
        if let Some(cap) = self.max_portfolio_risk_pct {
            if cap <= Decimal::ZERO || cap > Decimal::ONE {
                return Err(RiskError::InvalidConfig(format!(
                    "max_portfolio_risk_pct must be in (0, 1], got {}",
                    cap
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RiskConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_positions, 5);
        assert_eq!(config.risk_pct_per_trade, dec!(0.02));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            RiskConfig { max_positions: 0, ..Default::default() },
            RiskConfig { risk_pct_per_trade: dec!(-0.01), ..Default::default() },
            RiskConfig { stop_atr_multiple: dec!(0), ..Default::default() },
            RiskConfig { profit_ratio: dec!(-2), ..Default::default() },
            RiskConfig { cash_buffer_pct: dec!(1), ..Default::default() },
            RiskConfig { max_portfolio_risk_pct: Some(dec!(0)), ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(RiskError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RiskConfig =
            serde_json::from_str(r#"{"max_positions": 3, "max_portfolio_risk_pct": "0.1"}"#)
                .unwrap();
        assert_eq!(config.max_positions, 3);
        assert_eq!(config.max_portfolio_risk_pct, Some(dec!(0.1)));
        assert_eq!(config.cash_buffer_pct, dec!(0.10));
    }
}
