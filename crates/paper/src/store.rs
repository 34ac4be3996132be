//! Durable paper-trading ledger on SQLite.
//!
//! Every write is one transaction wrapped in bounded retry with exponential
//! backoff. A fill and the evaluation that caused it share a transaction. WAL journaling keeps readers in other processes unblocked while a
//! write is in flight. Rows are appended by a single writer, so `id` order is
//! transition order.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{error, info, warn};
use uuid::Uuid;

use common::{
    Decision, Error, ExitReason, Position, Regime, Result, Side, StoreConfig, Trade, TradeSource,
};

/// State rebuilt from the ledger on restart.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub balance: f64,
    pub position: Option<Position>,
    pub next_trade_id: u64,
}

/// One row of the `trades` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFill {
    pub trade_id: u64,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub volume: f64,
    pub balance: f64,
    pub source: TradeSource,
    pub exit_reason: Option<ExitReason>,
}

/// One row of the `strategy_evaluations` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvaluation {
    pub timestamp: DateTime<Utc>,
    pub decision: String,
    pub reason: String,
}

enum Write<'a> {
    Open { trade_id: u64, position: &'a Position, balance: f64 },
    Close(&'a Trade),
    Evaluation { decision: &'a Decision, indicators: String, conditions: String },
    Status { start_time: DateTime<Utc>, run_id: Uuid },
}

impl<'a> Write<'a> {
    fn evaluation(decision: &'a Decision) -> Result<Self> {
        Ok(Write::Evaluation {
            decision,
            indicators: serde_json::to_string(&decision.indicators)?,
            conditions: serde_json::to_string(&decision.conditions)?,
        })
    }

    async fn apply(&self, tx: &mut Transaction<'_, Sqlite>, bot_name: &str) -> Result<(), sqlx::Error> {
        match self {
            Write::Open { trade_id, position, balance } => {
                sqlx::query(
                    r#"
                    INSERT INTO trades
                        (trade_id, timestamp, type, price, volume, profit, fee, balance,
                         source, exit_reason, atr, regime, opened_at, bot_name)
                    VALUES (?1, ?2, 'buy', ?3, ?4, NULL, 0, ?5, ?6, NULL, ?7, ?8, ?2, ?9)
                    "#,
                )
                .bind(*trade_id as i64)
                .bind(position.entry_timestamp.to_rfc3339())
                .bind(position.entry_price)
                .bind(position.volume)
                .bind(*balance)
                .bind(position.source.to_string())
                .bind(position.entry_atr)
                .bind(position.regime.to_string())
                .bind(bot_name)
                .execute(&mut **tx)
                .await?;
            }
            Write::Close(trade) => {
                sqlx::query(
                    r#"
                    INSERT INTO trades
                        (trade_id, timestamp, type, price, volume, profit, fee, balance,
                         source, exit_reason, atr, regime, opened_at, bot_name)
                    VALUES (?1, ?2, 'sell', ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL, ?10, ?11)
                    "#,
                )
                .bind(trade.trade_id as i64)
                .bind(trade.close_timestamp.to_rfc3339())
                .bind(trade.exit_price)
                .bind(trade.volume)
                .bind(trade.profit)
                .bind(trade.fees_paid)
                .bind(trade.balance_after)
                .bind(trade.source.to_string())
                .bind(trade.exit_reason.as_str())
                .bind(trade.open_timestamp.to_rfc3339())
                .bind(bot_name)
                .execute(&mut **tx)
                .await?;
            }
            Write::Evaluation { decision, indicators, conditions } => {
                sqlx::query(
                    r#"
                    INSERT INTO strategy_evaluations
                        (timestamp, decision, reason, indicators_state, strategy_conditions,
                         price_at_evaluation, bot_name)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )
                .bind(decision.timestamp.to_rfc3339())
                .bind(decision.action.to_string())
                .bind(&decision.reason)
                .bind(indicators)
                .bind(conditions)
                .bind(decision.price)
                .bind(bot_name)
                .execute(&mut **tx)
                .await?;
            }
            Write::Status { start_time, run_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO bot_status (bot_name, start_time, run_id)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(bot_name) DO UPDATE
                        SET start_time = excluded.start_time, run_id = excluded.run_id
                    "#,
                )
                .bind(bot_name)
                .bind(start_time.to_rfc3339())
                .bind(run_id.to_string())
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }
}

/// Handle to the ledger of one bot. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TradeStore {
    pool: SqlitePool,
    bot_name: String,
    max_retries: u32,
    backoff: Duration,
}

impl TradeStore {
    /// Open (creating if needed) the database and run pending migrations.
    pub async fn connect(cfg: &StoreConfig, bot_name: impl Into<String>) -> Result<Self> {
        ensure_parent_dir(&cfg.database_url)?;
        let options = SqliteConnectOptions::from_str(&cfg.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(cfg.busy_timeout_ms));
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;

        let bot_name = bot_name.into();
        info!(url = %cfg.database_url, bot = %bot_name, "Trade store ready");
        Ok(Self {
            pool,
            bot_name,
            max_retries: cfg.max_write_retries,
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        })
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// Record a buy fill. `balance` is the cash balance at entry.
    /// `evaluation` is the automatic decision behind it, committed with the fill.
    pub async fn record_open(
        &self,
        trade_id: u64,
        position: &Position,
        balance: f64,
        evaluation: Option<&Decision>,
    ) -> Result<()> {
        let mut writes = vec![Write::Open { trade_id, position, balance }];
        if let Some(decision) = evaluation {
            writes.push(Write::evaluation(decision)?);
        }
        self.write("record_open", &writes).await
    }

    /// Record the sell fill that closes `trade`, plus the decision behind it.
    pub async fn record_close(&self, trade: &Trade, evaluation: Option<&Decision>) -> Result<()> {
        let mut writes = vec![Write::Close(trade)];
        if let Some(decision) = evaluation {
            writes.push(Write::evaluation(decision)?);
        }
        self.write("record_close", &writes).await
    }

    /// Record an evaluation that led to no fill.
    pub async fn record_evaluation(&self, decision: &Decision) -> Result<()> {
        self.write("record_evaluation", &[Write::evaluation(decision)?]).await
    }

    /// Upsert this bot's status row at process start.
    pub async fn mark_started(&self, start_time: DateTime<Utc>, run_id: Uuid) -> Result<()> {
        self.write("mark_started", &[Write::Status { start_time, run_id }]).await
    }

    /// Balance from the last row, plus the open position if the last buy has
    /// no later sell. `None` when this bot has no rows yet.
    pub async fn recover(&self) -> Result<Option<Recovered>> {
        let last = sqlx::query("SELECT balance FROM trades WHERE bot_name = ?1 ORDER BY id DESC LIMIT 1")
            .bind(&self.bot_name)
            .fetch_optional(&self.pool)
            .await?;
        let Some(last) = last else {
            return Ok(None);
        };
        let balance: f64 = last.try_get("balance")?;

        let last_closed: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(trade_id), 0) FROM trades WHERE bot_name = ?1 AND type = 'sell'",
        )
        .bind(&self.bot_name)
        .fetch_one(&self.pool)
        .await?;

        let open = sqlx::query(
            r#"
            SELECT price, volume, source, atr, regime, opened_at
            FROM trades
            WHERE bot_name = ?1 AND type = 'buy'
              AND id > COALESCE(
                  (SELECT MAX(id) FROM trades WHERE bot_name = ?1 AND type = 'sell'), 0)
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(&self.bot_name)
        .fetch_optional(&self.pool)
        .await?;

        let position = match open {
            Some(row) => Some(position_from_row(&row)?),
            None => None,
        };
        Ok(Some(Recovered { balance, position, next_trade_id: last_closed as u64 + 1 }))
    }

    /// Every fill of this bot by timestamp, ties in write order.
    pub async fn fills(&self) -> Result<Vec<StoredFill>> {
        let rows = sqlx::query(
            r#"
            SELECT trade_id, timestamp, type, price, volume, balance, source, exit_reason
            FROM trades WHERE bot_name = ?1 ORDER BY timestamp, id
            "#,
        )
        .bind(&self.bot_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<_> {
                let side: String = row.try_get("type")?;
                let source: String = row.try_get("source")?;
                let exit_reason: Option<String> = row.try_get("exit_reason")?;
                let trade_id: i64 = row.try_get("trade_id")?;
                Ok(StoredFill {
                    trade_id: trade_id as u64,
                    timestamp: parse_ts(&row.try_get::<String, _>("timestamp")?)?,
                    side: if side == "sell" { Side::Sell } else { Side::Buy },
                    price: row.try_get("price")?,
                    volume: row.try_get("volume")?,
                    balance: row.try_get("balance")?,
                    source: parse_source(&source),
                    exit_reason: exit_reason.as_deref().and_then(ExitReason::parse),
                })
            })
            .collect()
    }

    /// Every persisted evaluation of this bot by candle timestamp.
    pub async fn evaluations(&self) -> Result<Vec<StoredEvaluation>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, decision, reason FROM strategy_evaluations
            WHERE bot_name = ?1 ORDER BY timestamp, id
            "#,
        )
        .bind(&self.bot_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<_> {
                Ok(StoredEvaluation {
                    timestamp: parse_ts(&row.try_get::<String, _>("timestamp")?)?,
                    decision: row.try_get("decision")?,
                    reason: row.try_get("reason")?,
                })
            })
            .collect()
    }

    /// Candle timestamp of the newest persisted evaluation.
    pub async fn last_evaluation_time(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT timestamp FROM strategy_evaluations WHERE bot_name = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(&self.bot_name)
        .fetch_optional(&self.pool)
        .await?;
        raw.as_deref().map(parse_ts).transpose()
    }

    async fn write(&self, operation: &'static str, writes: &[Write<'_>]) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_write(writes).await {
                Ok(()) => return Ok(()),
                Err(e) if is_transient(&e) => {
                    if attempt > self.max_retries {
                        error!(operation, attempts = attempt, error = %e, "Store write gave up");
                        return Err(Error::PersistenceContention {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.backoff * (1u32 << (attempt - 1).min(10));
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn try_write(&self, writes: &[Write<'_>]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for write in writes {
            write.apply(&mut tx, &self.bot_name).await?;
        }
        tx.commit().await
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and their extended codes, or no free connection.
fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"))
                || db.message().contains("database is locked")
        }
        _ => false,
    }
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    let price: f64 = row.try_get("price")?;
    let source: String = row.try_get("source")?;
    let regime: Option<String> = row.try_get("regime")?;
    let opened_at: String = row.try_get("opened_at")?;
    Ok(Position {
        entry_price: price,
        volume: row.try_get("volume")?,
        entry_timestamp: parse_ts(&opened_at)?,
        source: parse_source(&source),
        entry_atr: row.try_get("atr")?,
        peak_price: price,
        regime: match regime.as_deref() {
            Some("range") => Regime::Range,
            _ => Regime::Trend,
        },
    })
}

fn parse_source(raw: &str) -> TradeSource {
    if raw == "manual" {
        TradeSource::Manual
    } else {
        TradeSource::Auto
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Config(format!("corrupt timestamp '{raw}' in store: {e}")))
}

fn ensure_parent_dir(url: &str) -> Result<()> {
    let rest = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
