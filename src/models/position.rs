//! Single-ticker holding and its two-stage ("2-for-1") exit protocol.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeReason;

/// Where a live position is in the exit protocol. A closed position is
/// removed from its portfolio, so it has no stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStage {
    /// Full size, protected by the initial stop
    Open,
    /// First half sold, remainder protected at breakeven
    HalfClosed,
}

impl ExitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStage::Open => "OPEN",
            ExitStage::HalfClosed => "HALF_CLOSED",
        }
    }
}

/// Sale the exit protocol wants for a position this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOrder {
    pub quantity: u64,
    pub reason: TradeReason,
}

/// Open long position with its stop plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,

    /// Whole shares held
    pub shares: u64,

    /// Weighted entry price
    pub avg_cost: Decimal,

    /// Last known market price
    pub current_price: Decimal,

    /// Price at which the whole position is sold
    pub stop_loss: Decimal,

    /// Price at which the first half is sold
    pub first_target: Decimal,

    /// Entry price; becomes the stop once the first half is sold
    pub breakeven: Decimal,

    /// ATR when the position was opened, never recomputed
    pub entry_atr: Decimal,

    #[serde(default)]
    pub first_half_sold: bool,
}

impl Position {
    /// Open a fresh position at `entry_price`.
    pub fn new(
        ticker: &str,
        shares: u64,
        entry_price: Decimal,
        stop_loss: Decimal,
        first_target: Decimal,
        entry_atr: Decimal,
    ) -> Self {
        Self {
            ticker: ticker.trim().to_uppercase(),
            shares,
            avg_cost: entry_price,
            current_price: entry_price,
            stop_loss,
            first_target,
            breakeven: entry_price,
            entry_atr,
            first_half_sold: false,
        }
    }

    pub fn stage(&self) -> ExitStage {
        if self.first_half_sold {
            ExitStage::HalfClosed
        } else {
            ExitStage::Open
        }
    }

    /// Stop currently protecting the position.
    pub fn active_stop(&self) -> Decimal {
        match self.stage() {
            ExitStage::Open => self.stop_loss,
            ExitStage::HalfClosed => self.breakeven,
        }
    }

    pub fn update_price(&mut self, current_price: Decimal) {
        self.current_price = current_price;
    }

    pub fn current_value(&self) -> Decimal {
        Decimal::from(self.shares) * self.current_price
    }

    pub fn cost_basis(&self) -> Decimal {
        Decimal::from(self.shares) * self.avg_cost
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.current_value() - self.cost_basis()
    }

    pub fn unrealized_pnl_pct(&self) -> Decimal {
        if self.avg_cost.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price - self.avg_cost) / self.avg_cost
    }

    /// Share of `portfolio_value` held in this position.
    pub fn weight_in(&self, portfolio_value: Decimal) -> Decimal {
        if portfolio_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.current_value() / portfolio_value
    }

    /// Unrealized exposure between the current price and the active stop.
    /// Zero once price is at or below the stop.
    pub fn capital_at_risk(&self) -> Decimal {
        (Decimal::from(self.shares) * (self.current_price - self.active_stop())).max(Decimal::ZERO)
    }

    /// Shares sold when the first target fires. A single share cannot be
    /// halved, so it is sold whole.
    pub fn first_half_quantity(&self) -> u64 {
        if self.shares <= 1 {
            self.shares
        } else {
            self.shares / 2
        }
    }

    /// Run the exit protocol against the current price. Rules are checked in
    /// priority order and at most one fires:
    ///
    /// 1. price at or below the active stop sells everything
    /// 2. an open position at or above its first target sells half
    /// 3. an open position with a strategy SELL sells everything
    ///
    /// Strategy SELLs are ignored once the first half has been sold.
    pub fn check_exit(&self, strategy_sell: bool) -> Option<ExitOrder> {
        if self.shares == 0 {
            return None;
        }

        if self.current_price <= self.active_stop() {
            let reason = match self.stage() {
                ExitStage::Open => TradeReason::StopHit,
                ExitStage::HalfClosed => TradeReason::BreakevenStopHit,
            };
            return Some(ExitOrder {
                quantity: self.shares,
                reason,
            });
        }

        if self.stage() == ExitStage::HalfClosed {
            return None;
        }

        if self.current_price >= self.first_target {
            return Some(ExitOrder {
                quantity: self.first_half_quantity(),
                reason: TradeReason::FirstTargetHit,
            });
        }

        if strategy_sell {
            return Some(ExitOrder {
                quantity: self.shares,
                reason: TradeReason::StrategySell,
            });
        }

        None
    }

    /// Remove `quantity` shares, returning how many were actually removed.
    pub fn reduce(&mut self, quantity: u64) -> u64 {
        let sold = quantity.min(self.shares);
        self.shares -= sold;
        sold
    }

    /// Add shares at `price`, averaging the cost. Breakeven follows the new average.
    pub fn add(&mut self, quantity: u64, price: Decimal) {
        let new_shares = self.shares + quantity;
        if new_shares > 0 {
            let total_cost = self.cost_basis() + Decimal::from(quantity) * price;
            self.avg_cost = total_cost / Decimal::from(new_shares);
            self.breakeven = self.avg_cost;
        }
        self.shares = new_shares;
        self.current_price = price;
    }

    /// Enter the second stage: the remainder is now protected at breakeven.
    pub fn move_stop_to_breakeven(&mut self) {
        self.stop_loss = self.breakeven;
        self.first_half_sold = true;
    }

    pub fn is_closed(&self) -> bool {
        self.shares == 0
    }

    /// Check the stop/target ordering expected for the current stage.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.ticker.is_empty() || self.ticker != self.ticker.trim().to_uppercase() {
            return Err(format!("ticker '{}' is not upper-case", self.ticker));
        }
        if self.shares == 0 {
            return Err(format!("{} has zero shares", self.ticker));
        }
        if self.avg_cost <= Decimal::ZERO || self.current_price <= Decimal::ZERO {
            return Err(format!("{} has non-positive cost or price", self.ticker));
        }
        if self.breakeven != self.avg_cost {
            return Err(format!(
                "{} breakeven {} differs from avg cost {}",
                self.ticker, self.breakeven, self.avg_cost
            ));
        }
        match self.stage() {
            ExitStage::Open => {
                if !(self.stop_loss < self.avg_cost && self.avg_cost < self.first_target) {
                    return Err(format!(
                        "{} expects stop {} < cost {} < target {}",
                        self.ticker, self.stop_loss, self.avg_cost, self.first_target
                    ));
                }
            }
            ExitStage::HalfClosed => {
                if self.stop_loss != self.breakeven {
                    return Err(format!(
                        "{} is half closed but stop {} is not at breakeven {}",
                        self.ticker, self.stop_loss, self.breakeven
                    ));
                }
            }
        }
        Ok(())
    }
}
