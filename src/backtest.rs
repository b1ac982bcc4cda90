//! Replay driver for running the risk manager over historical signal batches.
//!
//! Features:
//! - Feed dated signal batches through the decision engine in order
//! - Roll a single portfolio forward from one batch to the next
//! - Collect the equity curve, every trade intent and every skipped entry
//! - Calculate performance statistics

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RiskError;
use crate::metrics::{EquityPoint, PerformanceCalculator};
use crate::models::{PerformanceMetrics, Portfolio, Signal, TradeIntent};
use crate::trading::{CandidateOrdering, DecisionEngine, RiskConfig};

/// Signals for one valuation date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBatch {
    pub date: NaiveDate,
    pub signals: Vec<Signal>,
}

impl SignalBatch {
    pub fn new(date: NaiveDate, signals: Vec<Signal>) -> Self {
        Self { date, signals }
    }

    /// Read a JSON array of batches.
    pub fn load_file(path: &Path) -> Result<Vec<SignalBatch>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse signal batches in {}", path.display()))
    }
}

/// Replay configuration.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Portfolio name used in logs and results
    pub name: String,

    /// Starting cash
    pub initial_cash: Decimal,

    /// Risk manager configuration
    pub risk: RiskConfig,

    /// Annual risk-free rate for the Sharpe ratio
    pub risk_free_rate: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            name: "replay".to_string(),
            initial_cash: dec!(10000),
            risk: RiskConfig::default(),
            risk_free_rate: 0.02, // 2% risk-free
        }
    }
}

/// A trade intent with the date it was produced.
#[derive(Debug, Clone)]
pub struct DatedTrade {
    pub date: NaiveDate,
    pub trade: TradeIntent,
}

/// Replay results summary.
#[derive(Debug, Clone)]
pub struct ReplayResults {
    pub name: String,

    /// First and last batch dates
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    /// Portfolio value before the first batch
    pub initial_value: Decimal,

    /// Portfolio value after the last batch
    pub final_value: Decimal,

    /// Portfolio after the last batch
    pub final_portfolio: Portfolio,

    /// Total value after each batch
    pub equity_curve: Vec<EquityPoint>,

    /// All trade intents, in order
    pub trades: Vec<DatedTrade>,

    /// Entries and signals skipped along the way
    pub skipped: Vec<(NaiveDate, RiskError)>,

    /// Days on which the risk cap suppressed entries
    pub suppressed_days: usize,

    pub metrics: PerformanceMetrics,
}

impl ReplayResults {
    pub fn buys(&self) -> usize {
        self.trades.iter().filter(|t| t.trade.is_buy()).count()
    }

    pub fn sells(&self) -> usize {
        self.trades.len() - self.buys()
    }
}

impl std::fmt::Display for ReplayResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = &self.metrics;
        writeln!(f, "\n{:=^60}", " REPLAY RESULTS ")?;
        writeln!(f)?;
        writeln!(f, "Portfolio: {}", self.name)?;
        writeln!(
            f,
            "Period: {} to {} ({} batches)",
            self.start_date.format("%Y-%m-%d"),
            self.end_date.format("%Y-%m-%d"),
            self.equity_curve.len()
        )?;
        writeln!(f)?;
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:     ${:.2}", self.initial_value)?;
        writeln!(f, "Final:       ${:.2}", self.final_value)?;
        writeln!(f, "Cash:        ${:.2}", self.final_portfolio.cash)?;
        writeln!(f, "Open:        {} positions", self.final_portfolio.position_count())?;
        writeln!(f)?;
        writeln!(f, "--- Returns ---")?;
        writeln!(f, "Total:       {:.2}%", m.total_return * 100.0)?;
        writeln!(f, "Annualized:  {:.2}%", m.annualized_return * 100.0)?;
        writeln!(f, "Volatility:  {:.2}%", m.volatility * 100.0)?;
        writeln!(f)?;
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Entries:     {} ({} skipped)", self.buys(), self.skipped.len())?;
        writeln!(f, "Exits:       {}", m.closing_trades)?;
        writeln!(f, "Winners:     {} ({:.1}%)", m.winning_trades, m.win_rate * 100.0)?;
        writeln!(f, "Losers:      {}", m.losing_trades)?;
        writeln!(f, "Avg P&L:     ${:.2}", m.avg_realized_pnl)?;
        writeln!(f, "Profit Factor: {:.2}", m.profit_factor)?;
        writeln!(f)?;
        writeln!(f, "--- Risk Metrics ---")?;
        writeln!(f, "Max Drawdown: {:.2}% (${:.2})", m.max_drawdown * 100.0, m.max_drawdown_value)?;
        writeln!(f, "Sharpe Ratio: {:.2}", m.sharpe_ratio)?;
        writeln!(f, "Calmar Ratio: {:.2}", m.calmar_ratio)?;
        if self.suppressed_days > 0 {
            writeln!(f, "Entries suppressed by risk cap on {} days", self.suppressed_days)?;
        }
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// Runs signal batches through the decision engine.
pub struct Replayer {
    config: ReplayConfig,
    engine: DecisionEngine,
    calculator: PerformanceCalculator,
}

impl Replayer {
    /// Create a new replayer.
    pub fn new(config: ReplayConfig) -> Result<Self> {
        let engine =
            DecisionEngine::new(config.risk.clone()).context("Invalid risk configuration")?;
        let calculator = PerformanceCalculator::new(config.risk_free_rate);

        Ok(Self {
            config,
            engine,
            calculator,
        })
    }

    /// Replace the engine's candidate ordering.
    pub fn with_ordering(mut self, ordering: Box<dyn CandidateOrdering>) -> Self {
        self.engine = self.engine.with_ordering(ordering);
        self
    }

    /// Replay from a cash-only portfolio dated at the first batch.
    pub fn run(&self, batches: &[SignalBatch]) -> Result<ReplayResults> {
        let Some(first) = batches.first() else {
            bail!("No signal batches to replay");
        };

        let portfolio = Portfolio::new(&self.config.name, first.date, self.config.initial_cash);
        self.run_from(portfolio, batches)
    }

    /// Replay starting from an existing portfolio. Batches must be dated on
    /// or after the portfolio and strictly increasing.
    pub fn run_from(&self, mut portfolio: Portfolio, batches: &[SignalBatch]) -> Result<ReplayResults> {
        let Some(first) = batches.first() else {
            bail!("No signal batches to replay");
        };

        let start_date = portfolio.valuation_date;
        let initial_value = portfolio.total_value();

        info!(
            portfolio = %portfolio.name,
            batches = batches.len(),
            initial_value = %initial_value,
            ordering = self.engine.ordering_name(),
            "Starting replay"
        );

        let mut equity_curve = Vec::with_capacity(batches.len() + 1);
        if first.date > start_date {
            equity_curve.push((start_date, initial_value));
        }

        let mut trades = Vec::new();
        let mut skipped = Vec::new();
        let mut suppressed_days = 0;
        let mut previous: Option<NaiveDate> = None;

        for batch in batches {
            if batch.date < start_date {
                bail!(
                    "Signal batch for {} predates the portfolio snapshot ({})",
                    batch.date,
                    start_date
                );
            }
            if let Some(prev) = previous {
                if batch.date <= prev {
                    bail!("Signal batch for {} is out of order (previous {})", batch.date, prev);
                }
            }
            previous = Some(batch.date);

            portfolio.roll_forward(batch.date);
            let evaluation = self
                .engine
                .evaluate(&portfolio, &batch.signals)
                .with_context(|| format!("Evaluation failed on {}", batch.date))?;

            if evaluation.entries_suppressed {
                suppressed_days += 1;
            }

            debug!(
                date = %batch.date,
                signals = batch.signals.len(),
                trades = evaluation.trades.len(),
                value = %evaluation.portfolio.total_value(),
                "Replayed batch"
            );

            trades.extend(evaluation.trades.into_iter().map(|trade| DatedTrade {
                date: batch.date,
                trade,
            }));
            skipped.extend(evaluation.skipped.into_iter().map(|e| (batch.date, e)));

            portfolio = evaluation.portfolio;
            equity_curve.push((batch.date, portfolio.total_value()));
        }

        let intents: Vec<TradeIntent> = trades.iter().map(|t| t.trade.clone()).collect();
        let metrics = self.calculator.calculate(&equity_curve, &intents);
        let final_value = portfolio.total_value();

        info!(
            portfolio = %portfolio.name,
            final_value = %final_value,
            trades = trades.len(),
            total_return = metrics.total_return,
            "Replay complete"
        );

        Ok(ReplayResults {
            name: portfolio.name.clone(),
            start_date: first.date,
            end_date: portfolio.valuation_date,
            initial_value,
            final_value,
            final_portfolio: portfolio,
            equity_curve,
            trades,
            skipped,
            suppressed_days,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, TradeReason};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    fn lifecycle() -> Vec<SignalBatch> {
        vec![
            SignalBatch::new(date(1), vec![Signal::buy("AAPL", dec!(100), dec!(2))]),
            SignalBatch::new(date(2), vec![Signal::hold("AAPL", dec!(108))]),
            SignalBatch::new(date(3), vec![Signal::hold("AAPL", dec!(99))]),
        ]
    }

    #[test]
    fn test_replay_lifecycle() {
        let replayer = Replayer::new(ReplayConfig::default()).unwrap();
        let results = replayer.run(&lifecycle()).unwrap();

        assert_eq!(results.initial_value, dec!(10000));
        assert_eq!(results.final_value, dec!(10175));
        assert_eq!(results.final_portfolio.position_count(), 0);
        assert_eq!(results.trades.len(), 3);
        assert_eq!(results.buys(), 1);
        assert_eq!(results.sells(), 2);
        assert_eq!(results.trades[1].date, date(2));
        assert_eq!(results.trades[1].trade.reason, TradeReason::FirstTargetHit);

        let values: Vec<Decimal> = results.equity_curve.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![dec!(10000), dec!(10400), dec!(10175)]);

        let m = &results.metrics;
        assert_eq!(m.closing_trades, 2);
        assert_eq!(m.winning_trades, 1);
        assert_eq!(m.losing_trades, 1);
        assert_eq!(m.total_realized_pnl, dec!(175));
        assert!((m.profit_factor - 8.0).abs() < 1e-9);
        assert!((m.total_return - 0.0175).abs() < 1e-9);
        assert_eq!(m.max_drawdown_value, dec!(225));
    }

    #[test]
    fn test_rejects_out_of_order_batches() {
        let replayer = Replayer::new(ReplayConfig::default()).unwrap();
        let mut batches = lifecycle();
        batches.swap(1, 2);

        let err = replayer.run(&batches).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_rejects_empty_and_stale_batches() {
        let replayer = Replayer::new(ReplayConfig::default()).unwrap();
        assert!(replayer.run(&[]).is_err());

        let portfolio = Portfolio::new("live", date(5), dec!(10000));
        assert!(replayer.run_from(portfolio, &lifecycle()).is_err());
    }

    #[test]
    fn test_run_from_existing_portfolio() {
        let replayer = Replayer::new(ReplayConfig::default()).unwrap();
        let portfolio = Portfolio::new("live", NaiveDate::from_ymd_opt(2025, 8, 29).unwrap(), dec!(5000))
            .with_position(Position::new("AAPL", 50, dec!(100), dec!(96), dec!(108), dec!(2)));

        let batches = vec![SignalBatch::new(date(1), vec![Signal::sell("AAPL", dec!(102))])];
        let results = replayer.run_from(portfolio, &batches).unwrap();

        assert_eq!(results.equity_curve.len(), 2);
        assert_eq!(results.final_value, dec!(10100));
        assert_eq!(results.trades[0].trade.reason, TradeReason::StrategySell);
        assert_eq!(results.name, "live");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ReplayConfig {
            risk: RiskConfig {
                max_positions: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(Replayer::new(config).is_err());
    }

    #[test]
    fn test_batches_from_json() {
        let raw = r#"[
            {"date": "2025-09-01", "signals": [
                {"ticker": "aapl", "action": "BUY", "price": "100", "atr": "2"},
                {"ticker": "MSFT", "action": "HOLD", "price": "300"}
            ]}
        ]"#;
        let batches: Vec<SignalBatch> = serde_json::from_str(raw).unwrap();

        assert_eq!(batches[0].date, date(1));
        assert_eq!(batches[0].signals[1].atr, None);

        let results = Replayer::new(ReplayConfig::default())
            .unwrap()
            .run(&batches)
            .unwrap();
        assert_eq!(results.trades[0].trade.ticker, "AAPL");
        assert_eq!(results.trades[0].trade.quantity, 50);
    }

    #[test]
    fn test_display() {
        let results = Replayer::new(ReplayConfig::default())
            .unwrap()
            .run(&lifecycle())
            .unwrap();
        let output = results.to_string();
        assert!(output.contains("REPLAY RESULTS"));
        assert!(output.contains(&format!(
            "Period: {} to {} ({} batches)",
            results.start_date.format("%Y-%m-%d"),
            results.end_date.format("%Y-%m-%d"),
            results.equity_curve.len()
        )));
        assert!(output.contains("Final:       $10175.00"));
    }
}
