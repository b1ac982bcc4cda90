//! Swing-trading risk manager CLI.
//!
//! Keeps dated portfolio snapshots in SQLite and runs one evaluation cycle per
//! signal file: exits first, then new entries sized by ATR.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use swing_risk::backtest::{ReplayConfig, Replayer, SignalBatch};
use swing_risk::db::Database;
use swing_risk::models::{Portfolio, Signal};
use swing_risk::trading::{ordering_from_name, DecisionEngine, RiskConfig, RiskReport};

/// Swing-trading risk manager CLI.
#[derive(Parser)]
#[command(name = "swingrisk")]
#[command(about = "Size entries and manage exits for a swing-trading portfolio", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "SWINGRISK_DATABASE", default_value = "sqlite:./swingrisk.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Risk configuration JSON file (missing fields use defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Candidate ordering when BUYs compete for slots (alphabetical, low_volatility)
    #[arg(long, global = true, default_value = "alphabetical")]
    ordering: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cash-only portfolio snapshot
    Init {
        /// Portfolio name
        #[arg(short, long, default_value = "default")]
        name: String,

        /// Starting cash
        #[arg(long, default_value = "10000")]
        cash: Decimal,

        /// Valuation date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Run one evaluation cycle on a signals file
    Evaluate {
        /// JSON array of signals
        signals: PathBuf,

        /// Portfolio name
        #[arg(short, long, default_value = "default")]
        name: String,

        /// Valuation date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print intents without saving the new snapshot or trade log
        #[arg(long)]
        dry_run: bool,
    },

    /// Show positions, exit stages and capital at risk
    Show {
        /// Portfolio name
        #[arg(short, long, default_value = "default")]
        name: String,

        /// Show the latest snapshot on or before this date
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List all portfolios with their latest snapshot
    List,

    /// Show the recent trade log
    Trades {
        /// Portfolio name
        #[arg(short, long, default_value = "default")]
        name: String,

        /// Number of trades to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Replay a file of dated signal batches
    Replay {
        /// JSON array of {date, signals} batches
        batches: PathBuf,

        /// Starting cash
        #[arg(long, default_value = "10000")]
        cash: Decimal,
    },

    /// Show effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { name, cash, date } => {
            let db = Database::new(&cli.database).await?;
            let date = date.unwrap_or_else(today);

            if let Some(existing) = db.load_latest_snapshot(&name, date).await? {
                anyhow::bail!(
                    "Portfolio '{}' already has a snapshot dated {}",
                    name,
                    existing.valuation_date
                );
            }

            let portfolio = Portfolio::new(&name, date, cash);
            portfolio.validate(config.max_positions)?;
            db.save_snapshot(&portfolio).await?;

            info!(portfolio = %name, cash = %cash, date = %date, "Created portfolio");
            println!("Created portfolio '{}' with ${:.2} on {}", name, cash, date);
        }

        Commands::Evaluate {
            signals,
            name,
            date,
            dry_run,
        } => {
            let db = Database::new(&cli.database).await?;
            let date = date.unwrap_or_else(today);
            let engine = build_engine(config, &cli.ordering)?;

            let mut portfolio = db
                .load_latest_snapshot(&name, date)
                .await?
                .with_context(|| {
                    format!(
                        "No snapshot for '{}' on or before {}. Use 'swingrisk init' first.",
                        name, date
                    )
                })?;
            portfolio.roll_forward(date);

            let signals = load_signals(&signals)?;
            info!(
                portfolio = %name,
                date = %date,
                signals = signals.len(),
                dry_run = dry_run,
                "Evaluating"
            );

            let evaluation = engine
                .evaluate(&portfolio, &signals)
                .context("Evaluation aborted")?;

            println!(
                "\n=== Trade Intents ({}): {} exits, {} entries ===",
                date,
                evaluation.sells().count(),
                evaluation.buys().count()
            );
            if evaluation.trades.is_empty() {
                println!("  No trades.");
            }
            for trade in &evaluation.trades {
                let extra = match (trade.stop_loss, trade.first_target, trade.realized_pnl) {
                    (Some(stop), Some(target), _) => format!("stop {} target {}", stop, target),
                    (_, _, Some(pnl)) => format!("P&L ${:.2}", pnl),
                    _ => String::new(),
                };
                println!("  {:<40} {}", trade.to_string(), extra);
            }

            if !evaluation.skipped.is_empty() {
                println!("\n--- Skipped ---");
                for err in &evaluation.skipped {
                    println!("  {:<8} {}", err.ticker().unwrap_or("-"), err);
                }
            }
            if evaluation.entries_suppressed {
                println!("\nEntries suppressed: capital at risk above the configured cap.");
            }

            print_portfolio(&evaluation.portfolio, &evaluation.risk);

            if dry_run {
                println!("\nDry run: nothing saved.");
            } else {
                db.save_snapshot(&evaluation.portfolio).await?;
                db.record_trades(&name, date, &evaluation.trades).await?;
                println!("\nSaved snapshot for {}.", date);
            }
        }

        Commands::Show { name, date } => {
            let db = Database::new(&cli.database).await?;
            let date = date.unwrap_or_else(today);

            let Some(portfolio) = db.load_latest_snapshot(&name, date).await? else {
                println!("No snapshot for '{}'. Use 'swingrisk init' to create one.", name);
                return Ok(());
            };

            let risk = RiskReport::for_portfolio(&portfolio);
            print_portfolio(&portfolio, &risk);
        }

        Commands::List => {
            let db = Database::new(&cli.database).await?;
            let portfolios = db.list_portfolios().await?;

            if portfolios.is_empty() {
                println!("No portfolios. Use 'swingrisk init' to create one.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<12} {:>14} {:>14} {:>10}",
                "NAME", "DATE", "CASH", "TOTAL", "POSITIONS"
            );
            println!("{}", "-".repeat(74));
            for p in portfolios {
                println!(
                    "{:<20} {:<12} {:>14} {:>14} {:>10}",
                    p.name, p.valuation_date, p.cash, p.total_value, p.positions_count
                );
            }
        }

        Commands::Trades { name, limit } => {
            let db = Database::new(&cli.database).await?;
            let trades = db.recent_trades(&name, limit).await?;

            if trades.is_empty() {
                println!("No trades logged for '{}'.", name);
                return Ok(());
            }

            println!(
                "\n{:<12} {:<5} {:<8} {:>8} {:>12} {:<20} {:>12}",
                "DATE", "SIDE", "TICKER", "SHARES", "PRICE", "REASON", "P&L"
            );
            println!("{}", "-".repeat(84));
            for t in trades {
                println!(
                    "{:<12} {:<5} {:<8} {:>8} {:>12} {:<20} {:>12}",
                    t.valuation_date,
                    t.action,
                    t.ticker,
                    t.quantity,
                    t.price,
                    t.reason,
                    t.realized_pnl.as_deref().unwrap_or("-")
                );
            }
        }

        Commands::Replay { batches, cash } => {
            let batches = SignalBatch::load_file(&batches)?;
            let ordering = ordering_from_name(&cli.ordering)
                .with_context(|| format!("Unknown ordering '{}'", cli.ordering))?;

            info!(batches = batches.len(), cash = %cash, "Starting replay");

            let replay_config = ReplayConfig {
                initial_cash: cash,
                risk: config,
                ..Default::default()
            };
            let replayer = Replayer::new(replay_config)?.with_ordering(ordering);
            let results = replayer.run(&batches)?;
            println!("{}", results);

            // Trade breakdown by reason
            let mut by_reason: std::collections::BTreeMap<&str, (usize, Decimal)> =
                std::collections::BTreeMap::new();
            for dated in &results.trades {
                let entry = by_reason
                    .entry(dated.trade.reason.as_str())
                    .or_insert((0, Decimal::ZERO));
                entry.0 += 1;
                entry.1 += dated.trade.realized_pnl.unwrap_or_default();
            }

            println!("\n--- Trades by Reason ---");
            for (reason, (count, pnl)) in by_reason {
                println!("  {:<20} {:>3} trades  ${:.2}", reason, count, pnl);
            }
        }

        Commands::Config => {
            println!("\n=== Risk Configuration ===\n");
            println!("Sizing:");
            println!("  Risk Per Trade:       {}%", config.risk_pct_per_trade * dec!(100));
            println!("  Stop Distance:        {} x ATR", config.stop_atr_multiple);
            println!("  Cash Buffer:          {}%", config.cash_buffer_pct * dec!(100));

            println!("\nExits:");
            println!("  First Target:         {}R", config.profit_ratio);
            println!("  After First Target:   half sold, stop to breakeven");

            println!("\nPortfolio:");
            println!("  Max Positions:        {}", config.max_positions);
            match config.max_portfolio_risk_pct {
                Some(cap) => println!("  Max Capital at Risk:  {}%", cap * dec!(100)),
                None => println!("  Max Capital at Risk:  none"),
            }
            println!("  Candidate Ordering:   {}", cli.ordering);

            println!("\n{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn load_config(path: Option<&Path>) -> Result<RiskConfig> {
    match path {
        Some(path) => RiskConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(RiskConfig::default()),
    }
}

fn build_engine(config: RiskConfig, ordering: &str) -> Result<DecisionEngine> {
    let ordering =
        ordering_from_name(ordering).with_context(|| format!("Unknown ordering '{}'", ordering))?;
    Ok(DecisionEngine::new(config)?.with_ordering(ordering))
}

fn load_signals(path: &Path) -> Result<Vec<Signal>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse signals in {}", path.display()))
}

fn print_portfolio(portfolio: &Portfolio, risk: &RiskReport) {
    println!("\n=== Portfolio: {} ({}) ===", portfolio.name, portfolio.valuation_date);
    println!("Cash:             ${:.2}", portfolio.cash);
    println!("Positions Value:  ${:.2}", portfolio.positions_value());
    println!("Total Value:      ${:.2}", portfolio.total_value());
    println!("Unrealized P&L:   ${:.2}", portfolio.unrealized_pnl());
    println!(
        "Capital at Risk:  ${:.2} ({:.2}%)",
        risk.capital_at_risk,
        risk.capital_at_risk_pct * dec!(100)
    );

    if portfolio.positions.is_empty() {
        return;
    }

    println!(
        "\n{:<8} {:<12} {:>7} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10}",
        "TICKER", "STAGE", "SHARES", "COST", "PRICE", "STOP", "TARGET", "P&L", "AT RISK"
    );
    println!("{}", "-".repeat(98));
    for pos in portfolio.positions.values() {
        println!(
            "{:<8} {:<12} {:>7} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12.2} {:>10.2}",
            pos.ticker,
            pos.stage().as_str(),
            pos.shares,
            pos.avg_cost,
            pos.current_price,
            pos.active_stop(),
            pos.first_target,
            pos.unrealized_pnl(),
            pos.capital_at_risk()
        );
    }
}
