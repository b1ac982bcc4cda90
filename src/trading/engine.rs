//! Decision engine: turns a portfolio snapshot and a signal batch into trade intents.
//!
//! One evaluation runs two passes over a private copy of the portfolio:
//!
//! 1. Exits. Every held position gets its price refreshed and runs the exit
//!    protocol (stop, first target, strategy SELL). Proceeds go back to cash.
//! 2. Entries. BUY candidates without a position are ordered and filled
//!    while slots remain, sized from the portfolio value and cash left after
//!    pass 1.
//!
//! The caller's snapshot is never touched; it receives the updated copy only
//! when the whole cycle succeeds.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::{Result, RiskError};
use crate::models::{Portfolio, Signal, SignalAction, TradeIntent};

use super::{
    AlphabeticalOrdering, CandidateOrdering, PositionPlan, PositionSizer, RiskConfig, RiskReport,
};

/// Result of one evaluation cycle.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Portfolio after every intent was applied
    pub portfolio: Portfolio,

    /// SELLs first, then BUYs, in the order generated
    pub trades: Vec<TradeIntent>,

    /// Per-ticker problems that did not stop the cycle
    pub skipped: Vec<RiskError>,

    /// Capital at risk after the cycle
    pub risk: RiskReport,

    /// Entries were not considered because the risk cap was exceeded
    pub entries_suppressed: bool,
}

impl Evaluation {
    pub fn sells(&self) -> impl Iterator<Item = &TradeIntent> {
        self.trades.iter().filter(|t| !t.is_buy())
    }

    pub fn buys(&self) -> impl Iterator<Item = &TradeIntent> {
        self.trades.iter().filter(|t| t.is_buy())
    }
}

/// Risk manager decision engine.
pub struct DecisionEngine {
    config: RiskConfig,
    sizer: PositionSizer,
    ordering: Box<dyn CandidateOrdering>,
}

impl DecisionEngine {
    /// Create an engine with alphabetical candidate ordering.
    pub fn new(config: RiskConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sizer: PositionSizer::new(config.clone()),
            config,
            ordering: Box::new(AlphabeticalOrdering),
        })
    }

    /// Replace the candidate ordering.
    pub fn with_ordering(mut self, ordering: Box<dyn CandidateOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn ordering_name(&self) -> &'static str {
        self.ordering.name()
    }

    /// Run one cycle. Fails only when the snapshot breaks an invariant or a
    /// generated trade cannot be applied; per-ticker problems end up in
    /// `Evaluation::skipped`.
    pub fn evaluate(&self, portfolio: &Portfolio, signals: &[Signal]) -> Result<Evaluation> {
        portfolio.validate(self.config.max_positions)?;

        let mut working = portfolio.clone();
        let mut trades = Vec::new();
        let mut skipped = Vec::new();

        let batch = screen_signals(signals, &mut skipped);

        self.run_exits(&mut working, &batch, &mut trades, &mut skipped)?;

        let entries_suppressed = match self.config.max_portfolio_risk_pct {
            Some(cap) => {
                let report = RiskReport::for_portfolio(&working);
                if report.exceeds(cap) {
                    warn!(
                        portfolio = %working.name,
                        risk_pct = %report.capital_at_risk_pct,
                        cap = %cap,
                        "Capital at risk above cap, skipping entries"
                    );
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if !entries_suppressed {
            self.run_entries(&mut working, &batch, &mut trades, &mut skipped)?;
        }

        let risk = RiskReport::for_portfolio(&working);

        info!(
            portfolio = %working.name,
            date = %working.valuation_date,
            trades = trades.len(),
            skipped = skipped.len(),
            positions = working.position_count(),
            cash = %working.cash,
            total_value = %working.total_value(),
            "Evaluation complete"
        );

        Ok(Evaluation {
            portfolio: working,
            trades,
            skipped,
            risk,
            entries_suppressed,
        })
    }

    /// Pass 1: refresh prices and run the exit protocol on every held position.
    fn run_exits(
        &self,
        portfolio: &mut Portfolio,
        batch: &BTreeMap<String, Signal>,
        trades: &mut Vec<TradeIntent>,
        skipped: &mut Vec<RiskError>,
    ) -> Result<()> {
        for ticker in portfolio.tickers() {
            let mut signal = batch.get(&ticker);
            match signal {
                Some(s) => {
                    if let Err(e) = refresh_price(portfolio, &ticker, s.price) {
                        warn!(ticker = %ticker, error = %e, "Dropping signal");
                        skipped.push(e);
                        signal = None;
                    }
                }
                None => {
                    debug!(ticker = %ticker, "No signal for held position, using last price");
                }
            }

            let Some(position) = portfolio.position(&ticker) else {
                continue;
            };

            let strategy_sell = signal.is_some_and(|s| s.action == SignalAction::Sell);
            let Some(exit) = position.check_exit(strategy_sell) else {
                debug!(
                    ticker = %ticker,
                    stage = position.stage().as_str(),
                    price = %position.current_price,
                    stop = %position.active_stop(),
                    target = %position.first_target,
                    "Holding position"
                );
                continue;
            };

            let intent = TradeIntent::exit(
                &ticker,
                exit.quantity,
                position.current_price,
                position.avg_cost,
                exit.reason,
            );
            portfolio.apply_trade(&intent)?;

            info!(
                ticker = %ticker,
                shares = intent.quantity,
                price = %intent.price,
                reason = %intent.reason,
                pnl = %intent.realized_pnl.unwrap_or_default(),
                "Exit"
            );
            trades.push(intent);
        }
        Ok(())
    }

    /// Pass 2: fill free slots from the ordered BUY candidates.
    fn run_entries(
        &self,
        portfolio: &mut Portfolio,
        batch: &BTreeMap<String, Signal>,
        trades: &mut Vec<TradeIntent>,
        skipped: &mut Vec<RiskError>,
    ) -> Result<()> {
        let mut candidates: Vec<Signal> = batch
            .values()
            .filter(|s| s.action == SignalAction::Buy)
            .filter(|s| {
                let held = portfolio.has_position(&s.ticker);
                if held {
                    debug!(ticker = %s.ticker, "BUY ignored, position already open");
                }
                !held
            })
            .cloned()
            .collect();

        self.ordering.sort(&mut candidates);

        for (idx, signal) in candidates.iter().enumerate() {
            let available_slots = self
                .config
                .max_positions
                .saturating_sub(portfolio.position_count());
            if available_slots == 0 {
                let left: Vec<&str> = candidates[idx..].iter().map(|s| s.ticker.as_str()).collect();
                info!(skipped = ?left, "No position slots left");
                break;
            }

            let plan = match self.size_entry(portfolio, signal) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(ticker = %signal.ticker, error = %e, "Entry skipped");
                    skipped.push(e);
                    continue;
                }
            };

            let intent = TradeIntent::entry(
                &plan.ticker,
                plan.shares,
                plan.entry_price,
                plan.stop_loss,
                plan.first_target,
                plan.entry_atr,
            );
            portfolio.apply_trade(&intent)?;

            info!(
                ticker = %intent.ticker,
                shares = intent.quantity,
                price = %intent.price,
                stop = %plan.stop_loss,
                target = %plan.first_target,
                risk = %plan.planned_risk(),
                "Entry"
            );
            trades.push(intent);
        }
        Ok(())
    }

    /// Size one candidate against the current portfolio value and cash.
    /// A cash-constrained lot is cut down to what is affordable when that is
    /// still at least one share.
    fn size_entry(&self, portfolio: &Portfolio, signal: &Signal) -> Result<PositionPlan> {
        let atr = signal.atr.unwrap_or(Decimal::ZERO);
        let value = portfolio.total_value();

        let plan = self.sizer.plan(&signal.ticker, value, signal.price, atr)?;
        let spendable = self.sizer.spendable_cash(portfolio.cash, value);

        match self.sizer.fit_to_cash(plan.clone(), spendable) {
            Ok(plan) => Ok(plan),
            Err(RiskError::CashConstrained {
                wanted, affordable, ..
            }) if affordable >= 1 => {
                info!(
                    ticker = %signal.ticker,
                    wanted = wanted,
                    affordable = affordable,
                    "Reducing entry to available cash"
                );
                Ok(plan.with_shares(affordable))
            }
            Err(e) => Err(e),
        }
    }
}

/// Move a held position to a new price, keeping the old one when the
/// portfolio could no longer be valued at the new price.
fn refresh_price(portfolio: &mut Portfolio, ticker: &str, price: Decimal) -> Result<()> {
    let Some(previous) = portfolio.position(ticker).map(|p| p.current_price) else {
        return Ok(());
    };

    portfolio.update_price(ticker, price);
    if portfolio.checked_total_value().is_none() {
        portfolio.update_price(ticker, previous);
        return Err(RiskError::InvalidSignal {
            ticker: ticker.to_string(),
            reason: format!("price {} overflows the portfolio value", price),
        });
    }
    Ok(())
}

/// Validate and de-duplicate a batch, keyed by normalized ticker.
fn screen_signals(signals: &[Signal], skipped: &mut Vec<RiskError>) -> BTreeMap<String, Signal> {
    let mut batch = BTreeMap::new();

    for raw in signals {
        let signal = raw.normalized();

        if let Err(e) = signal.validate() {
            warn!(ticker = %signal.ticker, error = %e, "Dropping signal");
            skipped.push(e);
            continue;
        }

        if batch.contains_key(&signal.ticker) {
            let e = RiskError::InvalidSignal {
                ticker: signal.ticker.clone(),
                reason: "duplicate signal in batch".to_string(),
            };
            warn!(ticker = %signal.ticker, "Dropping duplicate signal");
            skipped.push(e);
            continue;
        }

        batch.insert(signal.ticker.clone(), signal);
    }

    batch
}

/// Evaluate one cycle with the default ordering, returning the updated
/// portfolio and the trade intents.
pub fn evaluate(
    portfolio: Portfolio,
    signals: &[Signal],
    config: &RiskConfig,
) -> Result<(Portfolio, Vec<TradeIntent>)> {
    let engine = DecisionEngine::new(config.clone())?;
    let evaluation = engine.evaluate(&portfolio, signals)?;
    Ok((evaluation.portfolio, evaluation.trades))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitStage, Position, TradeReason, TradeSide};
    use crate::trading::LowVolatilityOrdering;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(RiskConfig::default()).unwrap()
    }

    fn standard_position(ticker: &str) -> Position {
        Position::new(ticker, 10, dec!(100), dec!(96), dec!(108), dec!(2))
    }

    #[test]
    fn test_two_for_one_lifecycle() {
        let engine = engine();

        // Day 1: entry
        let portfolio = Portfolio::new("demo", date(), dec!(10000));
        let day1 = engine
            .evaluate(&portfolio, &[Signal::buy("AAPL", dec!(100), dec!(2))])
            .unwrap();

        assert_eq!(day1.trades.len(), 1);
        let buy = &day1.trades[0];
        assert_eq!(buy.action, TradeSide::Buy);
        assert_eq!(buy.quantity, 50);
        assert_eq!(buy.reason, TradeReason::Entry);

        let pos = day1.portfolio.position("AAPL").unwrap();
        assert_eq!(pos.shares, 50);
        assert_eq!(pos.stop_loss, dec!(96));
        assert_eq!(pos.first_target, dec!(108));
        assert_eq!(pos.breakeven, dec!(100));
        assert_eq!(pos.entry_atr, dec!(2));
        assert_eq!(day1.portfolio.cash, dec!(5000));

        // Day 2: first target
        let day2 = engine
            .evaluate(&day1.portfolio, &[Signal::hold("AAPL", dec!(108))])
            .unwrap();

        assert_eq!(day2.trades.len(), 1);
        let half = &day2.trades[0];
        assert_eq!(half.action, TradeSide::Sell);
        assert_eq!(half.quantity, 25);
        assert_eq!(half.price, dec!(108));
        assert_eq!(half.reason, TradeReason::FirstTargetHit);
        assert_eq!(half.realized_pnl, Some(dec!(200)));

        let pos = day2.portfolio.position("AAPL").unwrap();
        assert_eq!(pos.shares, 25);
        assert_eq!(pos.stop_loss, dec!(100));
        assert!(pos.first_half_sold);
        assert_eq!(pos.stage(), ExitStage::HalfClosed);
        assert_eq!(day2.portfolio.cash, dec!(7700));

        // Day 3: breakeven stop
        let day3 = engine
            .evaluate(&day2.portfolio, &[Signal::hold("AAPL", dec!(99))])
            .unwrap();

        assert_eq!(day3.trades.len(), 1);
        let rest = &day3.trades[0];
        assert_eq!(rest.quantity, 25);
        assert_eq!(rest.price, dec!(99));
        assert_eq!(rest.reason, TradeReason::BreakevenStopHit);
        assert!(!day3.portfolio.has_position("AAPL"));
        assert_eq!(day3.portfolio.cash, dec!(10175));
    }

    #[test]
    fn test_slots_fill_alphabetically() {
        let engine = engine();
        let portfolio = Portfolio::new("demo", date(), dec!(100000));
        let signals: Vec<Signal> = ["NVDA", "MSFT", "AAPL", "META", "GOOG", "AMZN"]
            .iter()
            .map(|t| Signal::buy(t, dec!(10), dec!(1)))
            .collect();

        let result = engine.evaluate(&portfolio, &signals).unwrap();

        let bought: Vec<&str> = result.trades.iter().map(|t| t.ticker.as_str()).collect();
        assert_eq!(bought, vec!["AAPL", "AMZN", "GOOG", "META", "MSFT"]);
        assert_eq!(result.portfolio.position_count(), 5);
        assert!(!result.portfolio.has_position("NVDA"));
        assert!(result.skipped.is_empty());
        assert!(result.trades.iter().all(|t| t.quantity == 1000));
    }

    #[test]
    fn test_exit_frees_slot_and_cash_for_entry() {
        let mut portfolio = Portfolio::new("demo", date(), dec!(5000));
        for ticker in ["AAA", "BBB", "CCC", "DDD", "EEE"] {
            portfolio = portfolio.with_position(standard_position(ticker));
        }

        let signals = vec![
            Signal::buy("ZZZ", dec!(50), dec!(1)),
            Signal::hold("AAA", dec!(95)),
            Signal::hold("BBB", dec!(100)),
            Signal::hold("CCC", dec!(100)),
            Signal::hold("DDD", dec!(100)),
            Signal::hold("EEE", dec!(100)),
        ];

        let result = engine().evaluate(&portfolio, &signals).unwrap();

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].ticker, "AAA");
        assert_eq!(result.trades[0].reason, TradeReason::StopHit);
        assert_eq!(result.trades[1].ticker, "ZZZ");

        // 9950 × 2% / 2 = 99.5 shares
        assert_eq!(result.trades[1].quantity, 99);
        assert_eq!(result.portfolio.position_count(), 5);
        assert_eq!(result.portfolio.cash, dec!(5000) + dec!(950) - dec!(4950));
    }

    #[test]
    fn test_full_portfolio_blocks_entries() {
        let mut portfolio = Portfolio::new("demo", date(), dec!(50000));
        for ticker in ["AAA", "BBB", "CCC", "DDD", "EEE"] {
            portfolio = portfolio.with_position(standard_position(ticker));
        }

        let result = engine()
            .evaluate(&portfolio, &[Signal::buy("ZZZ", dec!(50), dec!(1))])
            .unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.portfolio.position_count(), 5);
    }

    #[test]
    fn test_half_closed_ignores_strategy_sell() {
        let mut pos = Position::new("AAPL", 25, dec!(100), dec!(96), dec!(108), dec!(2));
        pos.move_stop_to_breakeven();
        pos.update_price(dec!(108));
        let portfolio = Portfolio::new("demo", date(), dec!(7700)).with_position(pos);

        let engine = engine();
        let first = engine
            .evaluate(&portfolio, &[Signal::sell("AAPL", dec!(105))])
            .unwrap();
        assert!(first.trades.is_empty());
        assert_eq!(first.portfolio.position("AAPL").unwrap().current_price, dec!(105));

        let second = engine
            .evaluate(&first.portfolio, &[Signal::sell("AAPL", dec!(112))])
            .unwrap();
        assert!(second.trades.is_empty());
        assert_eq!(second.portfolio.position("AAPL").unwrap().shares, 25);
    }

    #[test]
    fn test_strategy_sell_closes_open_position() {
        let portfolio = Portfolio::new("demo", date(), dec!(1000)).with_position(standard_position("AAPL"));

        let result = engine()
            .evaluate(&portfolio, &[Signal::sell("AAPL", dec!(102))])
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].reason, TradeReason::StrategySell);
        assert_eq!(result.trades[0].quantity, 10);
        assert_eq!(result.trades[0].realized_pnl, Some(dec!(20)));
        assert_eq!(result.portfolio.cash, dec!(2020));
        assert_eq!(result.portfolio.position_count(), 0);
    }

    #[test]
    fn test_single_share_at_target_closes_position() {
        let pos = Position::new("XYZ", 1, dec!(10), dec!(9), dec!(12), dec!(0.5));
        let portfolio = Portfolio::new("demo", date(), dec!(100)).with_position(pos);

        let result = engine()
            .evaluate(&portfolio, &[Signal::hold("XYZ", dec!(12))])
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].quantity, 1);
        assert_eq!(result.trades[0].reason, TradeReason::FirstTargetHit);
        assert!(!result.portfolio.has_position("XYZ"));
    }

    #[test]
    fn test_position_without_signal_uses_last_price() {
        let mut pos = standard_position("AAPL");
        pos.update_price(dec!(95));
        let portfolio = Portfolio::new("demo", date(), dec!(0)).with_position(pos);

        let result = engine().evaluate(&portfolio, &[]).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].reason, TradeReason::StopHit);
        assert_eq!(result.trades[0].price, dec!(95));
    }

    #[test]
    fn test_buy_signal_for_held_ticker_is_ignored() {
        let portfolio = Portfolio::new("demo", date(), dec!(10000)).with_position(standard_position("AAPL"));

        let result = engine()
            .evaluate(&portfolio, &[Signal::buy("AAPL", dec!(101), dec!(2))])
            .unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.portfolio.position("AAPL").unwrap().shares, 10);
        assert_eq!(result.portfolio.position("AAPL").unwrap().current_price, dec!(101));
    }

    #[test]
    fn test_invalid_signals_do_not_abort_cycle() {
        let portfolio = Portfolio::new("demo", date(), dec!(10000));
        let signals = vec![
            Signal::new("BAD", SignalAction::Buy, dec!(100), None),
            Signal::sell("XYZ", dec!(0)),
            Signal::buy("aapl", dec!(100), dec!(2)),
            Signal::buy("AAPL", dec!(90), dec!(1)),
        ];

        let result = engine().evaluate(&portfolio, &signals).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].ticker, "AAPL");
        assert_eq!(result.trades[0].price, dec!(100));
        assert_eq!(result.skipped.len(), 3);
        assert!(result
            .skipped
            .iter()
            .all(|e| matches!(e, RiskError::InvalidSignal { .. })));
    }

    #[test]
    fn test_cash_constrained_entry_is_reduced() {
        let mut held = Position::new("MSFT", 70, dec!(100), dec!(96), dec!(108), dec!(2));
        held.update_price(dec!(100));
        let portfolio = Portfolio::new("demo", date(), dec!(3000)).with_position(held);

        let result = engine()
            .evaluate(
                &portfolio,
                &[Signal::hold("MSFT", dec!(100)), Signal::buy("AAPL", dec!(100), dec!(2))],
            )
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].quantity, 20);
        assert_eq!(result.portfolio.cash, dec!(1000));
    }

    #[test]
    fn test_unaffordable_entry_is_skipped() {
        let held = Position::new("MSFT", 90, dec!(100), dec!(96), dec!(108), dec!(2));
        let portfolio = Portfolio::new("demo", date(), dec!(1000)).with_position(held);

        let result = engine()
            .evaluate(&portfolio, &[Signal::buy("AAPL", dec!(100), dec!(2))])
            .unwrap();

        assert!(result.trades.is_empty());
        assert!(matches!(
            result.skipped[0],
            RiskError::CashConstrained { affordable: 0, .. }
        ));
    }

    #[test]
    fn test_insufficient_size_skips_to_next_candidate() {
        let portfolio = Portfolio::new("demo", date(), dec!(1000));
        let signals = vec![
            Signal::buy("AAA", dec!(500), dec!(20)), // 20 risk vs 40 stop distance
            Signal::buy("BBB", dec!(10), dec!(1)),
        ];

        let result = engine().evaluate(&portfolio, &signals).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].ticker, "BBB");
        assert_eq!(result.trades[0].quantity, 10);
        assert!(matches!(result.skipped[0], RiskError::InsufficientSize { .. }));
    }

    #[test]
    fn test_risk_cap_suppresses_entries() {
        let config = RiskConfig {
            max_portfolio_risk_pct: Some(dec!(0.01)),
            ..Default::default()
        };
        let engine = DecisionEngine::new(config).unwrap();
        let portfolio = Portfolio::new("demo", date(), dec!(5000)).with_position(Position::new(
            "AAPL",
            50,
            dec!(100),
            dec!(96),
            dec!(108),
            dec!(2),
        ));

        let result = engine
            .evaluate(&portfolio, &[Signal::buy("MSFT", dec!(50), dec!(1))])
            .unwrap();

        assert!(result.entries_suppressed);
        assert!(result.trades.is_empty());
        assert_eq!(result.risk.capital_at_risk, dec!(200));
    }

    #[test]
    fn test_invariant_violation_is_fatal() {
        let mut broken = standard_position("AAPL");
        broken.stop_loss = dec!(110);
        let portfolio = Portfolio::new("demo", date(), dec!(1000)).with_position(broken);

        let err = engine()
            .evaluate(&portfolio, &[Signal::hold("AAPL", dec!(100))])
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, RiskError::InvariantViolation { .. }));
    }

    #[test]
    fn test_snapshot_is_left_untouched() {
        let portfolio = Portfolio::new("demo", date(), dec!(10000)).with_position(standard_position("AAPL"));
        let before = portfolio.clone();

        let result = engine()
            .evaluate(
                &portfolio,
                &[Signal::hold("AAPL", dec!(90)), Signal::buy("MSFT", dec!(100), dec!(2))],
            )
            .unwrap();

        assert_eq!(portfolio, before);
        assert_ne!(result.portfolio, before);
    }

    #[test]
    fn test_ordering_is_pluggable() {
        let config = RiskConfig {
            max_positions: 1,
            ..Default::default()
        };
        let signals = vec![
            Signal::buy("AAA", dec!(100), dec!(5)),
            Signal::buy("BBB", dec!(100), dec!(1)),
        ];
        let portfolio = Portfolio::new("demo", date(), dec!(100000));

        let alphabetical = DecisionEngine::new(config.clone()).unwrap();
        let result = alphabetical.evaluate(&portfolio, &signals).unwrap();
        assert_eq!(result.trades[0].ticker, "AAA");

        let low_vol = DecisionEngine::new(config)
            .unwrap()
            .with_ordering(Box::new(LowVolatilityOrdering));
        let result = low_vol.evaluate(&portfolio, &signals).unwrap();
        assert_eq!(result.trades[0].ticker, "BBB");
        assert_eq!(low_vol.ordering_name(), "low_volatility");
    }

    #[test]
    fn test_independent_portfolios_in_parallel() {
        let engine = engine();
        let live = Portfolio::new("live", date(), dec!(10000));
        let backtest = Portfolio::new("backtest", date(), dec!(20000));
        let signals = vec![Signal::buy("AAPL", dec!(100), dec!(2))];

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| engine.evaluate(&live, &signals));
            let b = s.spawn(|| engine.evaluate(&backtest, &signals));
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });

        assert_eq!(a.trades[0].quantity, 50);
        assert_eq!(b.trades[0].quantity, 100);
    }

    #[test]
    fn test_free_function() {
        let portfolio = Portfolio::new("demo", date(), dec!(10000));
        let (updated, trades) = evaluate(
            portfolio,
            &[Signal::buy("AAPL", dec!(100), dec!(2))],
            &RiskConfig::default(),
        )
        .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(updated.cash, dec!(5000));

        let bad = RiskConfig {
            max_positions: 0,
            ..Default::default()
        };
        let portfolio = Portfolio::new("demo", date(), dec!(10000));
        assert!(evaluate(portfolio, &[], &bad).is_err());
    }

    #[test]
    fn test_extreme_prices_are_skipped() {
        let portfolio =
            Portfolio::new("demo", date(), dec!(10000)).with_position(standard_position("MSFT"));
        let signals = vec![
            Signal::buy("HUGE", Decimal::MAX, dec!(1)),
            Signal::sell("MSFT", Decimal::MAX),
            Signal::buy("AAPL", dec!(100), dec!(2)),
        ];

        let result = engine().evaluate(&portfolio, &signals).unwrap();

        // MSFT keeps its last price and is not sold on the dropped SELL
        let msft = result.portfolio.position("MSFT").unwrap();
        assert_eq!(msft.current_price, dec!(100));
        assert_eq!(msft.shares, 10);

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].ticker, "AAPL");
        assert_eq!(result.buys().count(), 1);
        assert_eq!(result.sells().count(), 0);
        assert_eq!(result.skipped.len(), 2);
        assert!(result
            .skipped
            .iter()
            .all(|e| matches!(e, RiskError::InvalidSignal { .. })));
        let skipped: Vec<&str> = result.skipped.iter().filter_map(|e| e.ticker()).collect();
        assert_eq!(skipped, vec!["MSFT", "HUGE"]);
    }

    #[test]
    fn test_unnormalized_position_ticker_is_fatal() {
        let raw = r#"{
            "name": "demo",
            "valuation_date": "2025-09-01",
            "cash": "5000",
            "positions": {
                "aapl": {
                    "ticker": "aapl", "shares": 50, "avg_cost": "100", "current_price": "100",
                    "stop_loss": "96", "first_target": "108", "breakeven": "100", "entry_atr": "2"
                }
            }
        }"#;
        let portfolio: Portfolio = serde_json::from_str(raw).unwrap();

        let err = engine()
            .evaluate(&portfolio, &[Signal::buy("aapl", dec!(100), dec!(2))])
            .unwrap_err();
        assert!(matches!(err, RiskError::InvariantViolation { .. }));
    }
}
