use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AccountSnapshot, Action, CycleRecord, Decision, MarketSnapshot, NarrativeDigest, OrderAttempt,
    TimeInForce,
};
use crate::error::Result;

/// Durable sink for completed cycles and source of decision history
#[async_trait]
pub trait CycleStore: Send + Sync {
    /// Write every row of a cycle atomically
    async fn record_cycle(&self, record: &CycleRecord) -> Result<()>;

    /// Newest `limit` decisions, returned oldest first
    async fn recent_decisions(&self, limit: usize) -> Result<Vec<Decision>>;
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS market_snapshots (
        id BIGSERIAL PRIMARY KEY,
        cycle_at TIMESTAMPTZ NOT NULL,
        coin TEXT NOT NULL,
        mid_price DOUBLE PRECISION NOT NULL,
        mark_price DOUBLE PRECISION,
        oracle_price DOUBLE PRECISION,
        ema10 DOUBLE PRECISION,
        ema20 DOUBLE PRECISION,
        volatility_24h DOUBLE PRECISION,
        volume_24h DOUBLE PRECISION,
        funding_rate_latest DOUBLE PRECISION,
        funding_rate_avg DOUBLE PRECISION,
        open_interest DOUBLE PRECISION,
        buy_pressure_pct DOUBLE PRECISION,
        volume_delta_pct DOUBLE PRECISION,
        payload JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS account_snapshots (
        id BIGSERIAL PRIMARY KEY,
        cycle_at TIMESTAMPTZ NOT NULL,
        account_value NUMERIC,
        total_notional NUMERIC,
        total_margin_used NUMERIC,
        withdrawable NUMERIC,
        position_coin TEXT NOT NULL,
        position_size NUMERIC NOT NULL,
        position_side TEXT NOT NULL,
        position_leverage INTEGER,
        unrealized_pnl NUMERIC,
        raw JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS narrative_summaries (
        id BIGSERIAL PRIMARY KEY,
        cycle_at TIMESTAMPTZ NOT NULL,
        article_count INTEGER NOT NULL,
        narrative_count INTEGER NOT NULL,
        secondary_count INTEGER NOT NULL,
        narratives JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS decisions (
        id BIGSERIAL PRIMARY KEY,
        cycle_at TIMESTAMPTZ NOT NULL,
        action TEXT NOT NULL,
        size NUMERIC NOT NULL,
        leverage INTEGER NOT NULL,
        tif TEXT NOT NULL,
        confidence DOUBLE PRECISION NOT NULL,
        reasoning TEXT NOT NULL,
        decided_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_attempts (
        id BIGSERIAL PRIMARY KEY,
        cycle_at TIMESTAMPTZ NOT NULL,
        coin TEXT NOT NULL,
        side TEXT,
        size NUMERIC,
        limit_price NUMERIC,
        leverage INTEGER,
        tif TEXT,
        order_kind TEXT,
        leverage_updated BOOLEAN NOT NULL,
        status TEXT NOT NULL,
        exchange_order_id BIGINT,
        filled_size NUMERIC,
        avg_fill_price NUMERIC,
        error TEXT,
        raw_response JSONB,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_market_snapshots_cycle_at ON market_snapshots (cycle_at)",
    "CREATE INDEX IF NOT EXISTS idx_account_snapshots_cycle_at ON account_snapshots (cycle_at)",
    "CREATE INDEX IF NOT EXISTS idx_narrative_summaries_cycle_at ON narrative_summaries (cycle_at)",
    "CREATE INDEX IF NOT EXISTS idx_decisions_cycle_at ON decisions (cycle_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_order_attempts_cycle_at ON order_attempts (cycle_at)",
];

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes; safe to run on every start
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Cycle rows ====================

    async fn insert_market(
        tx: &mut Transaction<'_, Postgres>,
        cycle_at: DateTime<Utc>,
        market: &MarketSnapshot,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_snapshots (
                cycle_at, coin, mid_price, mark_price, oracle_price, ema10, ema20,
                volatility_24h, volume_24h, funding_rate_latest, funding_rate_avg,
                open_interest, buy_pressure_pct, volume_delta_pct, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(cycle_at)
        .bind(&market.coin)
        .bind(market.mid_price)
        .bind(market.mark_price)
        .bind(market.oracle_price)
        .bind(market.ema10)
        .bind(market.ema20)
        .bind(market.volatility_24h)
        .bind(market.volume_24h)
        .bind(market.funding_rate_latest)
        .bind(market.funding_rate_avg)
        .bind(market.open_interest)
        .bind(market.trade_pressure.buy_pressure_pct)
        .bind(market.trade_pressure.volume_delta_pct)
        .bind(serde_json::to_value(market)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_account(
        tx: &mut Transaction<'_, Postgres>,
        cycle_at: DateTime<Utc>,
        account: &AccountSnapshot,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_snapshots (
                cycle_at, account_value, total_notional, total_margin_used, withdrawable,
                position_coin, position_size, position_side, position_leverage,
                unrealized_pnl, raw
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(cycle_at)
        .bind(account.account_value)
        .bind(account.total_notional)
        .bind(account.total_margin_used)
        .bind(account.withdrawable)
        .bind(&account.position.coin)
        .bind(account.position.size)
        .bind(account.position.side.as_str())
        .bind(account.position.leverage.map(leverage_column))
        .bind(account.position.unrealized_pnl)
        .bind(&account.raw)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_narratives(
        tx: &mut Transaction<'_, Postgres>,
        cycle_at: DateTime<Utc>,
        article_count: usize,
        digest: &NarrativeDigest,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO narrative_summaries (
                cycle_at, article_count, narrative_count, secondary_count, narratives
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(cycle_at)
        .bind(article_count as i32)
        .bind(digest.narratives.len() as i32)
        .bind(digest.secondary_signals.len() as i32)
        .bind(serde_json::to_value(digest)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_decision(
        tx: &mut Transaction<'_, Postgres>,
        cycle_at: DateTime<Utc>,
        decision: &Decision,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (
                cycle_at, action, size, leverage, tif, confidence, reasoning, decided_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(cycle_at)
        .bind(decision.action.as_str())
        .bind(decision.size)
        .bind(leverage_column(decision.leverage))
        .bind(decision.tif.as_str())
        .bind(decision.confidence)
        .bind(&decision.reasoning)
        .bind(decision.decided_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_order(
        tx: &mut Transaction<'_, Postgres>,
        cycle_at: DateTime<Utc>,
        attempt: &OrderAttempt,
    ) -> Result<()> {
        let request = attempt.request.as_ref();
        sqlx::query(
            r#"
            INSERT INTO order_attempts (
                cycle_at, coin, side, size, limit_price, leverage, tif, order_kind,
                leverage_updated, status, exchange_order_id, filled_size, avg_fill_price,
                error, raw_response, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(cycle_at)
        .bind(&attempt.coin)
        .bind(request.map(|r| r.side.to_string()))
        .bind(request.map(|r| r.size))
        .bind(request.map(|r| r.limit_price))
        .bind(request.map(|r| leverage_column(r.leverage)))
        .bind(request.map(|r| r.tif.as_str()))
        .bind(request.map(|r| r.kind.as_str()))
        .bind(attempt.leverage_updated)
        .bind(attempt.status.as_str())
        .bind(attempt.exchange_order_id.map(|oid| oid as i64))
        .bind(attempt.filled_size)
        .bind(attempt.avg_fill_price)
        .bind(attempt.error.as_deref())
        .bind(attempt.raw_response.clone())
        .bind(attempt.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CycleStore for PostgresStore {
    #[instrument(skip(self, record), fields(cycle_at = %record.cycle_at))]
    async fn record_cycle(&self, record: &CycleRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        Self::insert_market(&mut tx, record.cycle_at, &record.market).await?;
        Self::insert_account(&mut tx, record.cycle_at, &record.account).await?;
        Self::insert_narratives(&mut tx, record.cycle_at, record.article_count, &record.digest)
            .await?;
        Self::insert_decision(&mut tx, record.cycle_at, &record.decision).await?;
        if let Some(attempt) = &record.order {
            Self::insert_order(&mut tx, record.cycle_at, attempt).await?;
        }

        tx.commit().await?;
        debug!(
            "Persisted cycle (order attempt: {})",
            record.order.is_some()
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn recent_decisions(&self, limit: usize) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            SELECT action, size, leverage, tif, confidence, reasoning, decided_at
            FROM decisions
            ORDER BY cycle_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut decisions: Vec<Decision> = rows
            .iter()
            .filter_map(|row| {
                let action: String = row.get("action");
                let tif: String = row.get("tif");
                let leverage: i32 = row.get("leverage");
                let action = match Action::from_str(&action) {
                    Ok(action) => action,
                    Err(_) => {
                        warn!("Skipping stored decision with unknown action '{}'", action);
                        return None;
                    }
                };
                Some(Decision {
                    action,
                    size: row.get::<Decimal, _>("size"),
                    leverage: leverage.max(1) as u32,
                    tif: TimeInForce::from_str(&tif).unwrap_or(TimeInForce::Ioc),
                    confidence: row.get("confidence"),
                    reasoning: row.get("reasoning"),
                    decided_at: row.get("decided_at"),
                })
            })
            .collect();

        decisions.reverse();
        Ok(decisions)
    }
}

/// `INTEGER` columns saturate instead of wrapping
fn leverage_column(leverage: u32) -> i32 {
    i32::try_from(leverage).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leverage_column_saturates() {
        assert_eq!(leverage_column(3), 3);
        assert_eq!(leverage_column(i32::MAX as u32), i32::MAX);
        assert_eq!(leverage_column(u32::MAX), i32::MAX);
    }

    #[test]
    fn test_schema_is_idempotent() {
        for statement in SCHEMA {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "non-idempotent DDL: {}",
                statement
            );
        }
    }

    #[test]
    fn test_every_table_is_keyed_by_cycle_at() {
        for table in [
            "market_snapshots",
            "account_snapshots",
            "narrative_summaries",
            "decisions",
            "order_attempts",
        ] {
            let create = SCHEMA
                .iter()
                .find(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {} ", table)))
                .unwrap_or_else(|| panic!("missing table {}", table));
            assert!(create.contains("cycle_at TIMESTAMPTZ NOT NULL"));
            assert!(SCHEMA
                .iter()
                .any(|s| s.contains("CREATE INDEX") && s.contains(&format!("ON {} (cycle_at", table))));
        }
    }
}
