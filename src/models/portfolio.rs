//! Portfolio snapshot: cash plus positions for one account at one date.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RiskError};

use super::{Position, TradeIntent, TradeReason, TradeSide};

/// Cash and positions of one named account as of `valuation_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    pub valuation_date: NaiveDate,

    /// Uncommitted cash, never negative
    pub cash: Decimal,

    /// Positions keyed by ticker
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
}

impl Portfolio {
    /// Create a cash-only portfolio.
    pub fn new(name: &str, valuation_date: NaiveDate, cash: Decimal) -> Self {
        Self {
            name: name.to_string(),
            valuation_date,
            cash,
            positions: BTreeMap::new(),
        }
    }

    /// Builder-style helper to seed a position, keyed by its ticker.
    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.insert(position.ticker.clone(), position);
        self
    }

    pub fn positions_value(&self) -> Decimal {
        self.positions.values().map(Position::current_value).sum()
    }

    /// Cash plus the market value of all positions.
    pub fn total_value(&self) -> Decimal {
        self.cash + self.positions_value()
    }

    /// Total value, or `None` when it does not fit in a `Decimal`.
    pub fn checked_total_value(&self) -> Option<Decimal> {
        self.positions.values().try_fold(self.cash, |total, pos| {
            Decimal::from(pos.shares)
                .checked_mul(pos.current_price)
                .and_then(|value| total.checked_add(value))
        })
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn has_position(&self, ticker: &str) -> bool {
        self.positions.contains_key(ticker)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Refresh a held position's price. Returns false when the ticker is not held.
    pub fn update_price(&mut self, ticker: &str, price: Decimal) -> bool {
        match self.positions.get_mut(ticker) {
            Some(pos) => {
                pos.update_price(price);
                true
            }
            None => false,
        }
    }

    /// Sum of unrealized exposure to each position's active stop.
    pub fn capital_at_risk(&self) -> Decimal {
        self.positions.values().map(Position::capital_at_risk).sum()
    }

    /// Capital at risk as a fraction of total value (zero for an empty account).
    pub fn capital_at_risk_pct(&self) -> Decimal {
        let total = self.total_value();
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.capital_at_risk() / total
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(Position::unrealized_pnl).sum()
    }

    /// Move the snapshot to a new valuation date.
    pub fn roll_forward(&mut self, valuation_date: NaiveDate) {
        self.valuation_date = valuation_date;
    }

    /// Apply an executed trade to cash and positions.
    ///
    /// BUYs need enough cash and either open a position (the intent must carry
    /// its stop plan) or average into an existing one. SELLs need enough shares;
    /// a position sold down to zero is removed. A FIRST_TARGET_HIT sale moves
    /// the remaining shares' stop to breakeven.
    pub fn apply_trade(&mut self, trade: &TradeIntent) -> Result<()> {
        let invalid = |reason: String| RiskError::InvalidTrade {
            ticker: trade.ticker.clone(),
            reason,
        };

        if trade.quantity == 0 {
            return Err(invalid("zero quantity".to_string()));
        }
        if trade.price <= Decimal::ZERO {
            return Err(invalid(format!("non-positive price {}", trade.price)));
        }

        let value = trade.value();

        match trade.action {
            TradeSide::Buy => {
                if value > self.cash {
                    return Err(invalid(format!(
                        "insufficient cash: {} < {}",
                        self.cash, value
                    )));
                }

                match self.positions.get_mut(&trade.ticker) {
                    Some(pos) => {
                        pos.add(trade.quantity, trade.price);
                        if let Some(stop) = trade.stop_loss {
                            pos.stop_loss = stop;
                        }
                        if let Some(target) = trade.first_target {
                            pos.first_target = target;
                        }
                    }
                    None => {
                        let (Some(stop), Some(target)) = (trade.stop_loss, trade.first_target)
                        else {
                            return Err(invalid("entry without stop plan".to_string()));
                        };
                        let position = Position::new(
                            &trade.ticker,
                            trade.quantity,
                            trade.price,
                            stop,
                            target,
                            trade.entry_atr.unwrap_or(Decimal::ZERO),
                        );
                        self.positions.insert(position.ticker.clone(), position);
                    }
                }

                self.cash -= value;
            }
            TradeSide::Sell => {
                let Some(pos) = self.positions.get_mut(&trade.ticker) else {
                    return Err(invalid("no open position".to_string()));
                };
                if pos.shares < trade.quantity {
                    return Err(invalid(format!(
                        "insufficient shares: {} < {}",
                        pos.shares, trade.quantity
                    )));
                }

                pos.reduce(trade.quantity);
                pos.update_price(trade.price);

                if pos.is_closed() {
                    self.positions.remove(&trade.ticker);
                } else if trade.reason == TradeReason::FirstTargetHit {
                    pos.move_stop_to_breakeven();
                }

                self.cash += value;
            }
        }

        debug!(
            portfolio = %self.name,
            trade = %trade,
            cash = %self.cash,
            positions = self.positions.len(),
            "Applied trade"
        );

        Ok(())
    }

    /// Check loaded state before it is evaluated.
    pub fn validate(&self, max_positions: usize) -> Result<()> {
        let violation = |reason: String| RiskError::InvariantViolation {
            portfolio: self.name.clone(),
            reason,
        };

        if self.cash < Decimal::ZERO {
            return Err(violation(format!("negative cash {}", self.cash)));
        }
        if self.positions.len() > max_positions {
            return Err(violation(format!(
                "{} positions exceed the limit of {}",
                self.positions.len(),
                max_positions
            )));
        }
        for (ticker, pos) in &self.positions {
            if *ticker != pos.ticker {
                return Err(violation(format!(
                    "position keyed '{}' holds ticker '{}'",
                    ticker, pos.ticker
                )));
            }
            pos.check_invariants().map_err(violation)?;
        }
        if self.checked_total_value().is_none() {
            return Err(violation("total value out of range".to_string()));
        }
        Ok(())
    }
}
