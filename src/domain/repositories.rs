//! Persistence seams. Implementations live in `infrastructure::persistence`;
//! everything a decision depends on is committed through these traits before
//! the triggering event is acknowledged.

use crate::domain::types::{
    AccountId, ContractId, Lockout, LockoutKind, Order, OrderId, Position,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

#[async_trait]
pub trait LockoutRepository: Send + Sync {
    /// Upserts; the `(account, kind, symbol)` key makes a new hard lockout
    /// replace the old one.
    async fn save(&self, lockout: &Lockout) -> Result<()>;
    async fn delete(
        &self,
        account_id: AccountId,
        kind: LockoutKind,
        symbol: Option<&str>,
    ) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<Lockout>>;
}

#[async_trait]
pub trait DailyPnlRepository: Send + Sync {
    async fn save(
        &self,
        account_id: AccountId,
        session_date: NaiveDate,
        realized: Decimal,
    ) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<(AccountId, NaiveDate, Decimal)>>;
}

/// Rolling trade-count persistence: minute-resolution buckets for the minute
/// and hour windows plus one running session row.
#[async_trait]
pub trait TradeActivityRepository: Send + Sync {
    /// Records one trade at `at` across every window kind, atomically.
    async fn record_trade(
        &self,
        account_id: AccountId,
        at: DateTime<Utc>,
        session_start: DateTime<Utc>,
    ) -> Result<()>;
    /// Minute buckets young enough to matter: `(window_start, count)`.
    async fn load_buckets(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, u32)>>;
    async fn load_session_count(&self, account_id: AccountId) -> Result<u32>;
    /// Rollover: drop the session row and stale buckets.
    async fn clear_session(&self, account_id: AccountId) -> Result<()>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn upsert_position(&self, position: &Position) -> Result<()>;
    async fn delete_position(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
    ) -> Result<()>;
    /// Reconciliation: replace the whole account snapshot in one transaction.
    async fn replace_positions(
        &self,
        account_id: AccountId,
        positions: &[Position],
    ) -> Result<()>;
    async fn load_positions(&self) -> Result<Vec<Position>>;

    async fn upsert_order(&self, order: &Order) -> Result<()>;
    async fn delete_order(&self, account_id: AccountId, order_id: OrderId) -> Result<()>;
    async fn replace_orders(&self, account_id: AccountId, orders: &[Order]) -> Result<()>;
    async fn load_orders(&self) -> Result<Vec<Order>>;
}

/// One executed (or failed) remediation, for the audit trail.
#[derive(Debug, Clone)]
pub struct EnforcementRecord {
    pub id: String,
    pub account_id: AccountId,
    pub kind: String,
    pub target: String,
    pub generation: u64,
    pub outcome: EnforcementOutcome,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementOutcome {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for EnforcementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnforcementOutcome::Success => write!(f, "success"),
            EnforcementOutcome::Failed => write!(f, "failed"),
            EnforcementOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

#[async_trait]
pub trait EnforcementLogRepository: Send + Sync {
    async fn append(&self, record: &EnforcementRecord) -> Result<()>;
}
