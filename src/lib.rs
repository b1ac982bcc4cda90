//! Swing-trading risk manager.
//!
//! Turns daily BUY/SELL/HOLD signals into sized orders, manages open positions
//! with a 2-for-1 exit protocol (half off at the first target, the rest
//! protected at breakeven) and keeps capital at risk visible.

pub mod backtest;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod trading;

pub use error::{Result, RiskError};
pub use models::{Portfolio, Position, Signal, SignalAction, TradeIntent, TradeReason, TradeSide};
pub use trading::{evaluate, DecisionEngine, Evaluation, RiskConfig};
