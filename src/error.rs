//! Errors raised by the risk core.

use rust_decimal::Decimal;
use thiserror::Error;

/// Error kinds produced while sizing entries, validating signals and
/// checking portfolio state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    /// The risk budget cannot pay for a single share at the computed stop distance.
    #[error("{ticker}: risk budget {risk_capital} too small for stop distance {stop_distance}")]
    InsufficientSize {
        ticker: String,
        risk_capital: Decimal,
        stop_distance: Decimal,
    },

    /// The risk-sized lot costs more than the spendable cash.
    #[error("{ticker}: wanted {wanted} shares but cash only covers {affordable}")]
    CashConstrained {
        ticker: String,
        wanted: u64,
        affordable: u64,
    },

    #[error("{ticker}: invalid signal: {reason}")]
    InvalidSignal { ticker: String, reason: String },

    /// Loaded state breaks a portfolio or position invariant. Fatal for the cycle.
    #[error("portfolio '{portfolio}' invariant violated: {reason}")]
    InvariantViolation { portfolio: String, reason: String },

    #[error("invalid risk configuration: {0}")]
    InvalidConfig(String),

    #[error("{ticker}: cannot apply trade: {reason}")]
    InvalidTrade { ticker: String, reason: String },
}

impl RiskError {
    /// Whether the error aborts the whole evaluation cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RiskError::InvariantViolation { .. } | RiskError::InvalidConfig(_)
        )
    }

    /// Ticker the error refers to, if it is a per-ticker error.
    pub fn ticker(&self) -> Option<&str> {
        match self {
            RiskError::InsufficientSize { ticker, .. }
            | RiskError::CashConstrained { ticker, .. }
            | RiskError::InvalidSignal { ticker, .. }
            | RiskError::InvalidTrade { ticker, .. } => Some(ticker),
            RiskError::InvariantViolation { .. } | RiskError::InvalidConfig(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;
