//! Priority ordering for same-cycle entry candidates.
//!
//! When more BUY signals arrive than there are free slots, the ordering
//! decides who gets in. The engine only asks for a sorted candidate list,
//! so orderings can be swapped without touching its control flow.

use std::cmp::Ordering;

use crate::models::Signal;

/// Sorts BUY candidates, best first.
pub trait CandidateOrdering: Send + Sync {
    fn name(&self) -> &'static str;

    fn compare(&self, a: &Signal, b: &Signal) -> Ordering;

    fn sort(&self, candidates: &mut [Signal]) {
        candidates.sort_by(|a, b| self.compare(a, b));
    }
}

/// Ticker name, ascending.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphabeticalOrdering;

impl CandidateOrdering for AlphabeticalOrdering {
    fn name(&self) -> &'static str {
        "alphabetical"
    }

    fn compare(&self, a: &Signal, b: &Signal) -> Ordering {
        a.ticker.cmp(&b.ticker)
    }
}

/// Calmest names first: ATR / price ascending, then ticker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowVolatilityOrdering;

impl CandidateOrdering for LowVolatilityOrdering {
    fn name(&self) -> &'static str {
        "low_volatility"
    }

    fn compare(&self, a: &Signal, b: &Signal) -> Ordering {
        match (a.relative_volatility(), b.relative_volatility()) {
            (Some(va), Some(vb)) => va.cmp(&vb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.ticker.cmp(&b.ticker))
    }
}

/// Ordering from an arbitrary sort key.
pub struct KeyOrdering<F> {
    name: &'static str,
    key: F,
}

impl<F> KeyOrdering<F> {
    pub fn new(name: &'static str, key: F) -> Self {
        Self { name, key }
    }
}

impl<F, K> CandidateOrdering for KeyOrdering<F>
where
    F: Fn(&Signal) -> K + Send + Sync,
    K: Ord,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn compare(&self, a: &Signal, b: &Signal) -> Ordering {
        (self.key)(a).cmp(&(self.key)(b))
    }
}

/// Look up an ordering by name.
pub fn ordering_from_name(name: &str) -> Option<Box<dyn CandidateOrdering>> {
    match name.to_lowercase().as_str() {
        "alphabetical" | "ticker" => Some(Box::new(AlphabeticalOrdering)),
        "low_volatility" | "lowvol" => Some(Box::new(LowVolatilityOrdering)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tickers(signals: &[Signal]) -> Vec<&str> {
        signals.iter().map(|s| s.ticker.as_str()).collect()
    }

    #[test]
    fn test_alphabetical() {
        let mut signals = vec![
            Signal::buy("MSFT", dec!(300), dec!(5)),
            Signal::buy("AAPL", dec!(100), dec!(2)),
            Signal::buy("GOOG", dec!(150), dec!(3)),
        ];
        AlphabeticalOrdering.sort(&mut signals);
        assert_eq!(tickers(&signals), vec!["AAPL", "GOOG", "MSFT"]);
    }

    #[test]
    fn test_low_volatility() {
        let mut signals = vec![
            Signal::buy("AAA", dec!(100), dec!(5)), // 5%
            Signal::buy("BBB", dec!(100), dec!(1)), // 1%
            Signal::buy("CCC", dec!(50), dec!(0.5)), // 1%
        ];
        LowVolatilityOrdering.sort(&mut signals);
        assert_eq!(tickers(&signals), vec!["BBB", "CCC", "AAA"]);
    }

    #[test]
    fn test_key_ordering() {
        let by_price_desc = KeyOrdering::new("price_desc", |s: &Signal| std::cmp::Reverse(s.price));
        let mut signals = vec![
            Signal::buy("AAA", dec!(10), dec!(1)),
            Signal::buy("BBB", dec!(30), dec!(1)),
            Signal::buy("CCC", dec!(20), dec!(1)),
        ];
        by_price_desc.sort(&mut signals);
        assert_eq!(tickers(&signals), vec!["BBB", "CCC", "AAA"]);
        assert_eq!(by_price_desc.name(), "price_desc");
    }

    #[test]
    fn test_lookup() {
        assert_eq!(ordering_from_name("alphabetical").unwrap().name(), "alphabetical");
        assert_eq!(ordering_from_name("LOWVOL").unwrap().name(), "low_volatility");
        assert!(ordering_from_name("momentum").is_none());
    }
}
