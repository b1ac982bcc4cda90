//! Trade intents emitted by the decision engine for execution and the trade log.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// Why a trade was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeReason {
    /// New position opened from a BUY signal
    Entry,
    /// Initial stop loss reached on an untouched position
    StopHit,
    /// Breakeven stop reached after the first target
    BreakevenStopHit,
    /// First half of the position taken at the first target
    FirstTargetHit,
    /// Strategy SELL on a position that has not yet taken profit
    StrategySell,
}

impl TradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeReason::Entry => "ENTRY",
            TradeReason::StopHit => "STOP_HIT",
            TradeReason::BreakevenStopHit => "BREAKEVEN_STOP_HIT",
            TradeReason::FirstTargetHit => "FIRST_TARGET_HIT",
            TradeReason::StrategySell => "STRATEGY_SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTRY" => Some(TradeReason::Entry),
            "STOP_HIT" => Some(TradeReason::StopHit),
            "BREAKEVEN_STOP_HIT" => Some(TradeReason::BreakevenStopHit),
            "FIRST_TARGET_HIT" => Some(TradeReason::FirstTargetHit),
            "STRATEGY_SELL" => Some(TradeReason::StrategySell),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A market-style order the engine wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub ticker: String,
    pub action: TradeSide,

    /// Whole shares
    pub quantity: u64,

    /// Execution price assumed by the engine
    pub price: Decimal,

    pub reason: TradeReason,

    /// Planned protective stop (entries only)
    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    /// Planned first profit target (entries only)
    #[serde(default)]
    pub first_target: Option<Decimal>,

    /// ATR frozen at entry (entries only)
    #[serde(default)]
    pub entry_atr: Option<Decimal>,

    /// quantity × (price − avg cost), exits only
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
}

impl TradeIntent {
    /// Entry order carrying the stop plan for the new position.
    pub fn entry(
        ticker: &str,
        quantity: u64,
        price: Decimal,
        stop_loss: Decimal,
        first_target: Decimal,
        entry_atr: Decimal,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            action: TradeSide::Buy,
            quantity,
            price,
            reason: TradeReason::Entry,
            stop_loss: Some(stop_loss),
            first_target: Some(first_target),
            entry_atr: Some(entry_atr),
            realized_pnl: None,
        }
    }

    /// Exit order; `avg_cost` is used to book the realized P&L.
    pub fn exit(
        ticker: &str,
        quantity: u64,
        price: Decimal,
        avg_cost: Decimal,
        reason: TradeReason,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            action: TradeSide::Sell,
            quantity,
            price,
            reason,
            stop_loss: None,
            first_target: None,
            entry_atr: None,
            realized_pnl: Some(Decimal::from(quantity) * (price - avg_cost)),
        }
    }

    /// Gross cash amount of the trade.
    pub fn value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price
    }

    pub fn is_buy(&self) -> bool {
        self.action == TradeSide::Buy
    }
}

impl std::fmt::Display for TradeIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} @ {} ({})",
            self.action.as_str(),
            self.quantity,
            self.ticker,
            self.price,
            self.reason
        )
    }
}
