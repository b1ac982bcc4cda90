//! SQLite persistence for portfolio snapshots and the trade log.
//!
//! Stores what a daily run needs to pick up where the last one stopped:
//! - One snapshot per (portfolio, valuation date): cash and summary values
//! - The positions belonging to each snapshot, with their stop plan
//! - Every trade intent produced by an evaluation
//!
//! Decimal values are stored as TEXT so they round-trip exactly.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::models::{Portfolio, Position, TradeIntent, TradeReason, TradeSide};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Snapshot header row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSnapshot {
    pub name: String,
    pub valuation_date: String,
    pub cash: String,
    pub total_value: String,
    pub positions_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPosition {
    ticker: String,
    shares: i64,
    avg_cost: String,
    current_price: String,
    stop_loss: String,
    first_target: String,
    breakeven: String,
    entry_atr: String,
    first_half_sold: bool,
}

/// Trade log record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: String,
    pub name: String,
    pub valuation_date: String,
    pub ticker: String,
    pub action: String,
    pub quantity: i64,
    pub price: String,
    pub reason: String,
    pub realized_pnl: Option<String>,
    pub created_at: String,
}

impl StoredTrade {
    /// Rebuild the intent this record was written from. The stop plan of
    /// entries is not logged.
    pub fn to_intent(&self) -> Result<TradeIntent> {
        let action = TradeSide::parse(&self.action)
            .with_context(|| format!("Unknown trade action '{}'", self.action))?;
        let reason = TradeReason::parse(&self.reason)
            .with_context(|| format!("Unknown trade reason '{}'", self.reason))?;

        Ok(TradeIntent {
            ticker: self.ticker.clone(),
            action,
            quantity: u64::try_from(self.quantity).context("Negative trade quantity")?,
            price: parse_decimal("price", &self.price)?,
            reason,
            stop_loss: None,
            first_target: None,
            entry_atr: None,
            realized_pnl: self
                .realized_pnl
                .as_deref()
                .map(|raw| parse_decimal("realized_pnl", raw))
                .transpose()?,
        })
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection that never expires,
    /// since every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Snapshot headers
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_snapshots (
                name TEXT NOT NULL,
                valuation_date TEXT NOT NULL,
                cash TEXT NOT NULL,
                total_value TEXT NOT NULL,
                positions_count INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (name, valuation_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Positions per snapshot
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_positions (
                name TEXT NOT NULL,
                valuation_date TEXT NOT NULL,
                ticker TEXT NOT NULL,
                shares INTEGER NOT NULL,
                avg_cost TEXT NOT NULL,
                current_price TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                first_target TEXT NOT NULL,
                breakeven TEXT NOT NULL,
                entry_atr TEXT NOT NULL,
                first_half_sold INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (name, valuation_date, ticker)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Trade log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_log (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                valuation_date TEXT NOT NULL,
                ticker TEXT NOT NULL,
                action TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL,
                reason TEXT NOT NULL,
                realized_pnl TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_log_name ON trade_log(name, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Snapshots ====================

    /// Save a snapshot, replacing any existing one for the same name and date.
    pub async fn save_snapshot(&self, portfolio: &Portfolio) -> Result<()> {
        let date = portfolio.valuation_date.format(DATE_FORMAT).to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM portfolio_positions WHERE name = ? AND valuation_date = ?")
            .bind(&portfolio.name)
            .bind(&date)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots (name, valuation_date, cash, total_value, positions_count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name, valuation_date) DO UPDATE SET
                cash = excluded.cash,
                total_value = excluded.total_value,
                positions_count = excluded.positions_count,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&portfolio.name)
        .bind(&date)
        .bind(portfolio.cash.to_string())
        .bind(portfolio.total_value().to_string())
        .bind(portfolio.position_count() as i64)
        .execute(&mut *tx)
        .await?;

        for pos in portfolio.positions.values() {
            sqlx::query(
                r#"
                INSERT INTO portfolio_positions
                    (name, valuation_date, ticker, shares, avg_cost, current_price,
                     stop_loss, first_target, breakeven, entry_atr, first_half_sold)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&portfolio.name)
            .bind(&date)
            .bind(&pos.ticker)
            .bind(i64::try_from(pos.shares).context("Share count out of range")?)
            .bind(pos.avg_cost.to_string())
            .bind(pos.current_price.to_string())
            .bind(pos.stop_loss.to_string())
            .bind(pos.first_target.to_string())
            .bind(pos.breakeven.to_string())
            .bind(pos.entry_atr.to_string())
            .bind(pos.first_half_sold)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("Failed to save snapshot")?;

        debug!(
            portfolio = %portfolio.name,
            date = %date,
            positions = portfolio.position_count(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Load the snapshot for an exact date.
    pub async fn load_snapshot(&self, name: &str, date: NaiveDate) -> Result<Option<Portfolio>> {
        let date_str = date.format(DATE_FORMAT).to_string();

        let header = sqlx::query_as::<_, StoredSnapshot>(
            r#"
            SELECT name, valuation_date, cash, total_value, positions_count
            FROM portfolio_snapshots
            WHERE name = ? AND valuation_date = ?
            "#,
        )
        .bind(name)
        .bind(&date_str)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch snapshot")?;

        let Some(header) = header else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, StoredPosition>(
            r#"
            SELECT ticker, shares, avg_cost, current_price, stop_loss, first_target,
                   breakeven, entry_atr, first_half_sold
            FROM portfolio_positions
            WHERE name = ? AND valuation_date = ?
            ORDER BY ticker
            "#,
        )
        .bind(name)
        .bind(&date_str)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch snapshot positions")?;

        let mut portfolio = Portfolio::new(name, date, parse_decimal("cash", &header.cash)?);
        for row in rows {
            let position = Position {
                ticker: row.ticker,
                shares: u64::try_from(row.shares).context("Negative share count")?,
                avg_cost: parse_decimal("avg_cost", &row.avg_cost)?,
                current_price: parse_decimal("current_price", &row.current_price)?,
                stop_loss: parse_decimal("stop_loss", &row.stop_loss)?,
                first_target: parse_decimal("first_target", &row.first_target)?,
                breakeven: parse_decimal("breakeven", &row.breakeven)?,
                entry_atr: parse_decimal("entry_atr", &row.entry_atr)?,
                first_half_sold: row.first_half_sold,
            };
            portfolio.positions.insert(position.ticker.clone(), position);
        }

        Ok(Some(portfolio))
    }

    /// Load the most recent snapshot dated on or before `on_or_before`.
    pub async fn load_latest_snapshot(
        &self,
        name: &str,
        on_or_before: NaiveDate,
    ) -> Result<Option<Portfolio>> {
        let latest: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT valuation_date FROM portfolio_snapshots
            WHERE name = ? AND valuation_date <= ?
            ORDER BY valuation_date DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(on_or_before.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up latest snapshot")?;

        match latest {
            Some((date,)) => self.load_snapshot(name, parse_date(&date)?).await,
            None => Ok(None),
        }
    }

    /// Latest snapshot header of every portfolio.
    pub async fn list_portfolios(&self) -> Result<Vec<StoredSnapshot>> {
        sqlx::query_as::<_, StoredSnapshot>(
            r#"
            SELECT s.name, s.valuation_date, s.cash, s.total_value, s.positions_count
            FROM portfolio_snapshots s
            WHERE s.valuation_date = (
                SELECT MAX(valuation_date) FROM portfolio_snapshots WHERE name = s.name
            )
            ORDER BY s.name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list portfolios")
    }

    /// Total value per snapshot date, oldest first.
    pub async fn equity_curve(&self, name: &str) -> Result<Vec<(NaiveDate, Decimal)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT valuation_date, total_value FROM portfolio_snapshots
            WHERE name = ?
            ORDER BY valuation_date
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch equity curve")?;

        rows.iter()
            .map(|(date, value)| Ok((parse_date(date)?, parse_decimal("total_value", value)?)))
            .collect()
    }

    // ==================== Trade Log ====================

    /// Append trade intents produced for a portfolio on a valuation date.
    pub async fn record_trades(
        &self,
        name: &str,
        valuation_date: NaiveDate,
        trades: &[TradeIntent],
    ) -> Result<()> {
        let date = valuation_date.format(DATE_FORMAT).to_string();
        let mut tx = self.pool.begin().await?;

        for trade in trades {
            sqlx::query(
                r#"
                INSERT INTO trade_log
                    (id, name, valuation_date, ticker, action, quantity, price, reason,
                     realized_pnl, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .bind(&date)
            .bind(&trade.ticker)
            .bind(trade.action.as_str())
            .bind(i64::try_from(trade.quantity).context("Trade quantity out of range")?)
            .bind(trade.price.to_string())
            .bind(trade.reason.as_str())
            .bind(trade.realized_pnl.map(|p| p.to_string()))
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("Failed to record trades")?;

        debug!(portfolio = %name, date = %date, count = trades.len(), "Recorded trades");
        Ok(())
    }

    /// Most recent trades of a portfolio, newest first.
    pub async fn recent_trades(&self, name: &str, limit: i64) -> Result<Vec<StoredTrade>> {
        sqlx::query_as::<_, StoredTrade>(
            r#"
            SELECT id, name, valuation_date, ticker, action, quantity, price, reason,
                   realized_pnl, created_at
            FROM trade_log
            WHERE name = ?
            ORDER BY valuation_date DESC, created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid {} value '{}'", field, raw))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .with_context(|| format!("Invalid valuation date '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    fn sample_portfolio() -> Portfolio {
        let mut half = Position::new("MSFT", 20, dec!(50), dec!(45), dec!(60), dec!(2.5));
        half.reduce(10);
        half.move_stop_to_breakeven();
        half.update_price(dec!(61.25));

        Portfolio::new("live", date(1), dec!(5000.55))
            .with_position(Position::new("AAPL", 50, dec!(100), dec!(96), dec!(108), dec!(2)))
            .with_position(half)
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let portfolio = sample_portfolio();

        db.save_snapshot(&portfolio).await.unwrap();
        let loaded = db.load_snapshot("live", date(1)).await.unwrap().unwrap();

        assert_eq!(loaded, portfolio);
        assert!(loaded.position("MSFT").unwrap().first_half_sold);
        assert!(db.load_snapshot("live", date(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_same_date() {
        let db = Database::in_memory().await.unwrap();
        let mut portfolio = sample_portfolio();
        db.save_snapshot(&portfolio).await.unwrap();

        portfolio.positions.remove("AAPL");
        portfolio.cash = dec!(10000.55);
        db.save_snapshot(&portfolio).await.unwrap();

        let loaded = db.load_snapshot("live", date(1)).await.unwrap().unwrap();
        assert_eq!(loaded.position_count(), 1);
        assert_eq!(loaded.cash, dec!(10000.55));

        let listed = db.list_portfolios().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].positions_count, 1);
    }

    #[tokio::test]
    async fn test_latest_snapshot() {
        let db = Database::in_memory().await.unwrap();
        let mut portfolio = sample_portfolio();
        db.save_snapshot(&portfolio).await.unwrap();

        portfolio.roll_forward(date(5));
        portfolio.cash = dec!(1234);
        db.save_snapshot(&portfolio).await.unwrap();

        let on_3rd = db.load_latest_snapshot("live", date(3)).await.unwrap().unwrap();
        assert_eq!(on_3rd.valuation_date, date(1));

        let on_9th = db.load_latest_snapshot("live", date(9)).await.unwrap().unwrap();
        assert_eq!(on_9th.valuation_date, date(5));
        assert_eq!(on_9th.cash, dec!(1234));

        assert!(db
            .load_latest_snapshot("live", NaiveDate::from_ymd_opt(2025, 8, 1).unwrap())
            .await
            .unwrap()
            .is_none());

        let curve = db.equity_curve("live").await.unwrap();
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].0, date(1));
    }

    #[tokio::test]
    async fn test_trade_log() {
        let db = Database::in_memory().await.unwrap();
        let trades = vec![
            TradeIntent::exit("AAPL", 25, dec!(108), dec!(100), TradeReason::FirstTargetHit),
            TradeIntent::entry("MSFT", 10, dec!(50), dec!(45), dec!(60), dec!(2.5)),
        ];

        db.record_trades("live", date(2), &trades).await.unwrap();
        db.record_trades("other", date(2), &trades[..1]).await.unwrap();

        let stored = db.recent_trades("live", 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].ticker, "MSFT");

        let sell = stored.iter().find(|t| t.ticker == "AAPL").unwrap().to_intent().unwrap();
        assert_eq!(sell.action, TradeSide::Sell);
        assert_eq!(sell.reason, TradeReason::FirstTargetHit);
        assert_eq!(sell.realized_pnl, Some(dec!(200)));

        assert_eq!(db.recent_trades("live", 1).await.unwrap().len(), 1);
        assert_eq!(db.recent_trades("other", 10).await.unwrap().len(), 1);
    }
}
