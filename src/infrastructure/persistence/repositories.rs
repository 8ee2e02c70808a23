use crate::domain::repositories::{
    DailyPnlRepository, EnforcementLogRepository, EnforcementRecord, LockoutRepository,
    SnapshotRepository, TradeActivityRepository,
};
use crate::domain::types::{
    AccountId, ContractId, Lockout, LockoutKind, Order, OrderId, OrderSide, OrderStatus,
    OrderType, Position, PositionSide,
};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Sentinel stored for manual-only lockouts.
const EXPIRES_NEVER: i64 = i64::MAX;

/// All repository traits over one sqlite handle.
#[derive(Clone)]
pub struct SqlitePersistence {
    database: Database,
}

impl SqlitePersistence {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn expires_to_db(lockout: &Lockout) -> i64 {
    if lockout.is_manual_only() {
        EXPIRES_NEVER
    } else {
        ts(lockout.expires_at)
    }
}

fn expires_from_db(secs: i64) -> DateTime<Utc> {
    if secs == EXPIRES_NEVER {
        Lockout::never()
    } else {
        from_ts(secs)
    }
}

fn kind_to_db(kind: LockoutKind) -> &'static str {
    match kind {
        LockoutKind::Hard => "hard",
        LockoutKind::Cooldown => "cooldown",
        LockoutKind::Symbol => "symbol",
    }
}

fn kind_from_db(raw: &str) -> Result<LockoutKind> {
    match raw {
        "hard" => Ok(LockoutKind::Hard),
        "cooldown" => Ok(LockoutKind::Cooldown),
        "symbol" => Ok(LockoutKind::Symbol),
        other => anyhow::bail!("unknown lockout kind `{}` in database", other),
    }
}

fn side_from_db(raw: &str) -> Result<PositionSide> {
    match raw {
        "LONG" => Ok(PositionSide::Long),
        "SHORT" => Ok(PositionSide::Short),
        other => anyhow::bail!("unknown position side `{}` in database", other),
    }
}

fn order_side_from_db(raw: &str) -> Result<OrderSide> {
    match raw {
        "BUY" => Ok(OrderSide::Bid),
        "SELL" => Ok(OrderSide::Ask),
        other => anyhow::bail!("unknown order side `{}` in database", other),
    }
}

fn order_type_from_db(raw: &str) -> Result<OrderType> {
    match raw {
        "LIMIT" => Ok(OrderType::Limit),
        "MARKET" => Ok(OrderType::Market),
        "STOP_LIMIT" => Ok(OrderType::StopLimit),
        "STOP" => Ok(OrderType::Stop),
        "TRAILING_STOP" => Ok(OrderType::TrailingStop),
        other => anyhow::bail!("unknown order type `{}` in database", other),
    }
}

fn order_status_from_db(raw: &str) -> Result<OrderStatus> {
    match raw {
        "None" => Ok(OrderStatus::None),
        "Open" => Ok(OrderStatus::Open),
        "Filled" => Ok(OrderStatus::Filled),
        "Cancelled" => Ok(OrderStatus::Cancelled),
        "Expired" => Ok(OrderStatus::Expired),
        "Rejected" => Ok(OrderStatus::Rejected),
        "Pending" => Ok(OrderStatus::Pending),
        other => anyhow::bail!("unknown order status `{}` in database", other),
    }
}

fn decimal_from_db(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_default()
}

#[async_trait]
impl LockoutRepository for SqlitePersistence {
    async fn save(&self, lockout: &Lockout) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lockouts (account_id, kind, symbol, reason, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(account_id, kind, symbol) DO UPDATE SET
                reason = excluded.reason,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            "#,
        )
        .bind(lockout.account_id)
        .bind(kind_to_db(lockout.kind))
        .bind(lockout.symbol.as_deref().unwrap_or(""))
        .bind(&lockout.reason)
        .bind(expires_to_db(lockout))
        .bind(ts(lockout.created_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to save lockout")?;
        Ok(())
    }

    async fn delete(
        &self,
        account_id: AccountId,
        kind: LockoutKind,
        symbol: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM lockouts WHERE account_id = $1 AND kind = $2 AND symbol = $3",
        )
        .bind(account_id)
        .bind(kind_to_db(kind))
        .bind(symbol.unwrap_or(""))
        .execute(&self.database.pool)
        .await
        .context("Failed to delete lockout")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Lockout>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, i64, i64)>(
            "SELECT account_id, kind, symbol, reason, expires_at, created_at FROM lockouts",
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load lockouts")?;

        rows.into_iter()
            .map(|(account_id, kind, symbol, reason, expires_at, created_at)| {
                Ok(Lockout {
                    account_id,
                    symbol: (!symbol.is_empty()).then_some(symbol),
                    kind: kind_from_db(&kind)?,
                    reason,
                    expires_at: expires_from_db(expires_at),
                    created_at: from_ts(created_at),
                })
            })
            .collect()
    }
}

#[async_trait]
impl DailyPnlRepository for SqlitePersistence {
    async fn save(
        &self,
        account_id: AccountId,
        session_date: NaiveDate,
        realized: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_pnl (account_id, session_date, realized)
            VALUES ($1, $2, $3)
            ON CONFLICT(account_id, session_date) DO UPDATE SET
                realized = excluded.realized
            "#,
        )
        .bind(account_id)
        .bind(session_date)
        .bind(realized.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to save daily pnl")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(AccountId, NaiveDate, Decimal)>> {
        let rows = sqlx::query_as::<_, (i64, NaiveDate, String)>(
            "SELECT account_id, session_date, realized FROM daily_pnl",
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load daily pnl")?;
        Ok(rows
            .into_iter()
            .map(|(account, date, realized)| (account, date, decimal_from_db(&realized)))
            .collect())
    }
}

#[async_trait]
impl TradeActivityRepository for SqlitePersistence {
    async fn record_trade(
        &self,
        account_id: AccountId,
        at: DateTime<Utc>,
        session_start: DateTime<Utc>,
    ) -> Result<()> {
        let minute_start = ts(at) - ts(at).rem_euclid(60);
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .context("Failed to open trade-count transaction")?;

        for kind in ["minute", "hour"] {
            sqlx::query(
                r#"
                INSERT INTO trade_counts (account_id, window_kind, window_start, count)
                VALUES ($1, $2, $3, 1)
                ON CONFLICT(account_id, window_kind, window_start) DO UPDATE SET
                    count = count + 1
                "#,
            )
            .bind(account_id)
            .bind(kind)
            .bind(minute_start)
            .execute(&mut *tx)
            .await
            .context("Failed to record trade bucket")?;
        }

        sqlx::query(
            r#"
            INSERT INTO trade_counts (account_id, window_kind, window_start, count)
            VALUES ($1, 'session', $2, 1)
            ON CONFLICT(account_id, window_kind, window_start) DO UPDATE SET
                count = count + 1
            "#,
        )
        .bind(account_id)
        .bind(ts(session_start))
        .execute(&mut *tx)
        .await
        .context("Failed to record session trade count")?;

        // Evict buckets past the hour horizon while we are here.
        sqlx::query(
            "DELETE FROM trade_counts WHERE window_kind IN ('minute', 'hour') AND window_start < $1",
        )
        .bind(ts(at) - 3600)
        .execute(&mut *tx)
        .await
        .context("Failed to evict stale trade buckets")?;

        tx.commit()
            .await
            .context("Failed to commit trade-count transaction")?;
        Ok(())
    }

    async fn load_buckets(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, u32)>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT window_start, count FROM trade_counts
            WHERE account_id = $1 AND window_kind = 'minute' AND window_start >= $2
            ORDER BY window_start
            "#,
        )
        .bind(account_id)
        .bind(ts(since))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load trade buckets")?;
        Ok(rows
            .into_iter()
            .map(|(start, count)| (from_ts(start), count as u32))
            .collect())
    }

    async fn load_session_count(&self, account_id: AccountId) -> Result<u32> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COALESCE(SUM(count), 0) FROM trade_counts
            WHERE account_id = $1 AND window_kind = 'session'
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to load session trade count")?;
        Ok(row.0 as u32)
    }

    async fn clear_session(&self, account_id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM trade_counts WHERE account_id = $1 AND window_kind = 'session'")
            .bind(account_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to clear session trade counts")?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for SqlitePersistence {
    async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions_snapshot
                (account_id, contract_id, side, size, average_price, opened_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(account_id, contract_id) DO UPDATE SET
                side = excluded.side,
                size = excluded.size,
                average_price = excluded.average_price,
                opened_at = excluded.opened_at
            "#,
        )
        .bind(position.account_id)
        .bind(&position.contract_id)
        .bind(position.side.to_string())
        .bind(position.size as i64)
        .bind(position.average_price.to_string())
        .bind(ts(position.opened_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert position snapshot")?;
        Ok(())
    }

    async fn delete_position(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM positions_snapshot WHERE account_id = $1 AND contract_id = $2",
        )
        .bind(account_id)
        .bind(contract_id)
        .execute(&self.database.pool)
        .await
        .context("Failed to delete position snapshot")?;
        Ok(())
    }

    async fn replace_positions(
        &self,
        account_id: AccountId,
        positions: &[Position],
    ) -> Result<()> {
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .context("Failed to open snapshot transaction")?;
        sqlx::query("DELETE FROM positions_snapshot WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear position snapshot")?;
        for position in positions {
            sqlx::query(
                r#"
                INSERT INTO positions_snapshot
                    (account_id, contract_id, side, size, average_price, opened_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(position.account_id)
            .bind(&position.contract_id)
            .bind(position.side.to_string())
            .bind(position.size as i64)
            .bind(position.average_price.to_string())
            .bind(ts(position.opened_at))
            .execute(&mut *tx)
            .await
            .context("Failed to write position snapshot")?;
        }
        tx.commit()
            .await
            .context("Failed to commit position snapshot")?;
        Ok(())
    }

    async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, (i64, String, String, i64, String, i64)>(
            r#"
            SELECT account_id, contract_id, side, size, average_price, opened_at
            FROM positions_snapshot
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load position snapshots")?;

        rows.into_iter()
            .map(|(account_id, contract_id, side, size, avg, opened_at)| {
                Ok(Position {
                    account_id,
                    contract_id,
                    side: side_from_db(&side)?,
                    size: size as u32,
                    average_price: decimal_from_db(&avg),
                    opened_at: from_ts(opened_at),
                })
            })
            .collect()
    }

    async fn upsert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders_snapshot
                (account_id, order_id, contract_id, side, order_type, status, size,
                 limit_price, stop_price, fill_volume, filled_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT(account_id, order_id) DO UPDATE SET
                status = excluded.status,
                size = excluded.size,
                limit_price = excluded.limit_price,
                stop_price = excluded.stop_price,
                fill_volume = excluded.fill_volume,
                filled_price = excluded.filled_price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(order.account_id)
        .bind(order.order_id)
        .bind(&order.contract_id)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.status.to_string())
        .bind(order.size as i64)
        .bind(order.limit_price.map(|p| p.to_string()))
        .bind(order.stop_price.map(|p| p.to_string()))
        .bind(order.fill_volume as i64)
        .bind(order.filled_price.map(|p| p.to_string()))
        .bind(ts(order.created_at))
        .bind(ts(order.updated_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert order snapshot")?;
        Ok(())
    }

    async fn delete_order(&self, account_id: AccountId, order_id: OrderId) -> Result<()> {
        sqlx::query("DELETE FROM orders_snapshot WHERE account_id = $1 AND order_id = $2")
            .bind(account_id)
            .bind(order_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to delete order snapshot")?;
        Ok(())
    }

    async fn replace_orders(&self, account_id: AccountId, orders: &[Order]) -> Result<()> {
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .context("Failed to open order snapshot transaction")?;
        sqlx::query("DELETE FROM orders_snapshot WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear order snapshot")?;
        for order in orders {
            sqlx::query(
                r#"
                INSERT INTO orders_snapshot
                    (account_id, order_id, contract_id, side, order_type, status, size,
                     limit_price, stop_price, fill_volume, filled_price, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(order.account_id)
            .bind(order.order_id)
            .bind(&order.contract_id)
            .bind(order.side.to_string())
            .bind(order.order_type.to_string())
            .bind(order.status.to_string())
            .bind(order.size as i64)
            .bind(order.limit_price.map(|p| p.to_string()))
            .bind(order.stop_price.map(|p| p.to_string()))
            .bind(order.fill_volume as i64)
            .bind(order.filled_price.map(|p| p.to_string()))
            .bind(ts(order.created_at))
            .bind(ts(order.updated_at))
            .execute(&mut *tx)
            .await
            .context("Failed to write order snapshot")?;
        }
        tx.commit()
            .await
            .context("Failed to commit order snapshot")?;
        Ok(())
    }

    async fn load_orders(&self) -> Result<Vec<Order>> {
        type Row = (
            i64,
            i64,
            String,
            String,
            String,
            String,
            i64,
            Option<String>,
            Option<String>,
            i64,
            Option<String>,
            i64,
            i64,
        );
        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT account_id, order_id, contract_id, side, order_type, status, size,
                   limit_price, stop_price, fill_volume, filled_price, created_at, updated_at
            FROM orders_snapshot
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load order snapshots")?;

        rows.into_iter()
            .map(
                |(
                    account_id,
                    order_id,
                    contract_id,
                    side,
                    order_type,
                    status,
                    size,
                    limit_price,
                    stop_price,
                    fill_volume,
                    filled_price,
                    created_at,
                    updated_at,
                )| {
                    Ok(Order {
                        order_id,
                        account_id,
                        contract_id,
                        side: order_side_from_db(&side)?,
                        order_type: order_type_from_db(&order_type)?,
                        status: order_status_from_db(&status)?,
                        size: size as u32,
                        limit_price: limit_price.as_deref().map(decimal_from_db),
                        stop_price: stop_price.as_deref().map(decimal_from_db),
                        fill_volume: fill_volume as u32,
                        filled_price: filled_price.as_deref().map(decimal_from_db),
                        created_at: from_ts(created_at),
                        updated_at: from_ts(updated_at),
                    })
                },
            )
            .collect()
    }
}

#[async_trait]
impl EnforcementLogRepository for SqlitePersistence {
    async fn append(&self, record: &EnforcementRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enforcement_log
                (id, account_id, kind, target, generation, outcome, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.id)
        .bind(record.account_id)
        .bind(&record.kind)
        .bind(&record.target)
        .bind(record.generation as i64)
        .bind(record.outcome.to_string())
        .bind(&record.detail)
        .bind(ts(record.at))
        .execute(&self.database.pool)
        .await
        .context("Failed to append enforcement record")?;
        Ok(())
    }
}
