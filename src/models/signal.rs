//! Trading signals handed to the risk manager by the signal generator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};

/// Raw action suggested by a strategy, with no sizing attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Hold,
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Hold => "HOLD",
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
        }
    }

    /// Map the numeric strategy output (-1 / 0 / 1) to an action.
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(SignalAction::Sell),
            0 => Some(SignalAction::Hold),
            1 => Some(SignalAction::Buy),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One strategy verdict for one ticker, priced at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub action: SignalAction,

    /// Current price, must be positive
    pub price: Decimal,

    /// Average True Range; required for BUY
    #[serde(default)]
    pub atr: Option<Decimal>,
}

impl Signal {
    pub fn new(ticker: &str, action: SignalAction, price: Decimal, atr: Option<Decimal>) -> Self {
        Self {
            ticker: ticker.trim().to_uppercase(),
            action,
            price,
            atr,
        }
    }

    pub fn buy(ticker: &str, price: Decimal, atr: Decimal) -> Self {
        Self::new(ticker, SignalAction::Buy, price, Some(atr))
    }

    pub fn sell(ticker: &str, price: Decimal) -> Self {
        Self::new(ticker, SignalAction::Sell, price, None)
    }

    pub fn hold(ticker: &str, price: Decimal) -> Self {
        Self::new(ticker, SignalAction::Hold, price, None)
    }

    /// Build a signal from the numeric strategy code.
    pub fn from_code(ticker: &str, code: i8, price: Decimal, atr: Option<Decimal>) -> Result<Self> {
        let action = SignalAction::from_code(code).ok_or_else(|| RiskError::InvalidSignal {
            ticker: ticker.trim().to_uppercase(),
            reason: format!("unknown signal code {}", code),
        })?;
        Ok(Self::new(ticker, action, price, atr))
    }

    /// Return a copy with the ticker upper-cased, as positions key on it.
    pub fn normalized(&self) -> Self {
        Self {
            ticker: self.ticker.trim().to_uppercase(),
            ..self.clone()
        }
    }

    /// Reject malformed signals: empty ticker, non-positive price, BUY without a positive ATR.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| RiskError::InvalidSignal {
            ticker: self.ticker.clone(),
            reason,
        };

        if self.ticker.trim().is_empty() {
            return Err(invalid("empty ticker".to_string()));
        }
        if self.price <= Decimal::ZERO {
            return Err(invalid(format!("non-positive price {}", self.price)));
        }
        if self.action == SignalAction::Buy {
            match self.atr {
                None => return Err(invalid("BUY without ATR".to_string())),
                Some(atr) if atr <= Decimal::ZERO => {
                    return Err(invalid(format!("non-positive ATR {}", atr)));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// ATR relative to price; used to rank entries by volatility.
    pub fn relative_volatility(&self) -> Option<Decimal> {
        match self.atr {
            Some(atr) if self.price > Decimal::ZERO => Some(atr / self.price),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ticker_is_upper_cased() {
        let signal = Signal::buy(" aapl", dec!(100), dec!(2));
        assert_eq!(signal.ticker, "AAPL");
    }

    #[test]
    fn test_signal_codes() {
        assert_eq!(SignalAction::from_code(-1), Some(SignalAction::Sell));
        assert_eq!(SignalAction::from_code(0), Some(SignalAction::Hold));
        assert_eq!(SignalAction::from_code(1), Some(SignalAction::Buy));
        assert!(Signal::from_code("msft", 2, dec!(10), None).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(Signal::buy("AAPL", dec!(100), dec!(2)).validate().is_ok());
        assert!(Signal::sell("AAPL", dec!(0)).validate().is_err());
        assert!(Signal::hold("AAPL", dec!(-1)).validate().is_err());
        assert!(Signal::new("AAPL", SignalAction::Buy, dec!(100), None).validate().is_err());
        assert!(Signal::buy("AAPL", dec!(100), dec!(0)).validate().is_err());

        // ATR is not required outside BUY
        assert!(Signal::sell("AAPL", dec!(100)).validate().is_ok());
    }

    #[test]
    fn test_deserialize_batch() {
        let json = r#"[
            {"ticker": "aapl", "action": "BUY", "price": "100", "atr": "2"},
            {"ticker": "MSFT", "action": "HOLD", "price": 310.5}
        ]"#;
        let signals: Vec<Signal> = serde_json::from_str(json).unwrap();
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[0].atr, Some(dec!(2)));
        assert_eq!(signals[1].atr, None);
        assert_eq!(signals[0].normalized().ticker, "AAPL");
    }
}
