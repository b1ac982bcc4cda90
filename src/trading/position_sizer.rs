//! ATR-based fixed-fractional position sizing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{Result, RiskError};

use super::RiskConfig;

/// Sized entry with its stop plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionPlan {
    pub ticker: String,
    pub shares: u64,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub first_target: Decimal,
    pub breakeven: Decimal,
    pub entry_atr: Decimal,

    /// Entry price minus stop loss
    pub risk_per_share: Decimal,

    /// Portfolio value × risk fraction
    pub risk_capital: Decimal,
}

impl PositionPlan {
    /// Cash needed to buy the lot. Plans from `PositionSizer::plan` are
    /// checked to be priceable; smaller lots stay within range.
    pub fn cost(&self) -> Decimal {
        Decimal::from(self.shares) * self.entry_price
    }

    /// Loss if the initial stop is hit.
    pub fn planned_risk(&self) -> Decimal {
        Decimal::from(self.shares) * self.risk_per_share
    }

    /// Same stop plan with a smaller lot.
    pub fn with_shares(&self, shares: u64) -> Self {
        Self {
            shares,
            ..self.clone()
        }
    }
}

/// Turns (portfolio value, price, ATR) into a share count and stop plan.
pub struct PositionSizer {
    config: RiskConfig,
}

impl PositionSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn stop_distance(&self, atr: Decimal) -> Decimal {
        self.config.stop_atr_multiple * atr
    }

    /// Risk-based size, ignoring cash.
    ///
    /// shares = floor(value × risk% / (multiple × ATR)), stop = price − multiple × ATR,
    /// first target = price + ratio × (price − stop).
    pub fn plan(
        &self,
        ticker: &str,
        portfolio_value: Decimal,
        price: Decimal,
        atr: Decimal,
    ) -> Result<PositionPlan> {
        let out_of_range = |what: &str| RiskError::InvalidSignal {
            ticker: ticker.to_string(),
            reason: format!("{} out of range (price {}, ATR {})", what, price, atr),
        };

        let risk_capital = portfolio_value
            .checked_mul(self.config.risk_pct_per_trade)
            .ok_or_else(|| out_of_range("risk capital"))?;
        let stop_distance = self
            .config
            .stop_atr_multiple
            .checked_mul(atr)
            .ok_or_else(|| out_of_range("stop distance"))?;

        let insufficient = || RiskError::InsufficientSize {
            ticker: ticker.to_string(),
            risk_capital,
            stop_distance,
        };

        if stop_distance <= Decimal::ZERO || risk_capital <= Decimal::ZERO {
            return Err(insufficient());
        }

        let shares = risk_capital
            .checked_div(stop_distance)
            .and_then(|n| n.floor().to_u64())
            .ok_or_else(|| out_of_range("share count"))?;
        if shares < 1 {
            return Err(insufficient());
        }

        let stop_loss = price
            .checked_sub(stop_distance)
            .ok_or_else(|| out_of_range("stop loss"))?;
        let risk_per_share = stop_distance;
        let first_target = self
            .config
            .profit_ratio
            .checked_mul(risk_per_share)
            .and_then(|r| price.checked_add(r))
            .ok_or_else(|| out_of_range("first target"))?;

        // The lot must be priceable; cost() relies on it
        Decimal::from(shares)
            .checked_mul(price)
            .ok_or_else(|| out_of_range("position cost"))?;

        debug!(
            ticker = %ticker,
            shares = shares,
            risk_capital = %risk_capital,
            stop_loss = %stop_loss,
            first_target = %first_target,
            "Sized entry"
        );

        Ok(PositionPlan {
            ticker: ticker.to_string(),
            shares,
            entry_price: price,
            stop_loss,
            first_target,
            breakeven: price,
            entry_atr: atr,
            risk_per_share,
            risk_capital,
        })
    }

    /// Cash that entries may spend: everything above the buffer floor.
    pub fn spendable_cash(&self, cash: Decimal, portfolio_value: Decimal) -> Decimal {
        let floor = portfolio_value * self.config.cash_buffer_pct;
        (cash - floor).max(Decimal::ZERO)
    }

    /// Check a plan against spendable cash. When the lot is too expensive the
    /// error carries the largest affordable share count.
    pub fn fit_to_cash(&self, plan: PositionPlan, spendable: Decimal) -> Result<PositionPlan> {
        let cost = Decimal::from(plan.shares).checked_mul(plan.entry_price);
        if cost.is_some_and(|c| c <= spendable) {
            return Ok(plan);
        }

        let affordable = if plan.entry_price > Decimal::ZERO {
            spendable
                .checked_div(plan.entry_price)
                .and_then(|n| n.floor().to_u64())
                .unwrap_or(0)
        } else {
            0
        };

        Err(RiskError::CashConstrained {
            ticker: plan.ticker.clone(),
            wanted: plan.shares,
            affordable,
        })
    }

    /// Full sizing pass: risk sizing, then the cash check.
    pub fn size(
        &self,
        ticker: &str,
        portfolio_value: Decimal,
        cash: Decimal,
        price: Decimal,
        atr: Decimal,
    ) -> Result<PositionPlan> {
        let plan = self.plan(ticker, portfolio_value, price, atr)?;
        let spendable = self.spendable_cash(cash, portfolio_value);
        self.fit_to_cash(plan, spendable)
    }
}
