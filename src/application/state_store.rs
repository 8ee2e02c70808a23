use crate::domain::pnl::DailyPnl;
use crate::domain::repositories::{
    DailyPnlRepository, SnapshotRepository, TradeActivityRepository,
};
use crate::domain::types::{
    AccountFlags, AccountId, ContractId, Order, OrderId, Position, Trade, TradeId,
};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// What a position event did to the store, for the dispatcher's timer
/// bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionTransition {
    /// Flat → non-zero.
    pub opened: bool,
    /// Non-zero → flat (record pruned).
    pub closed: bool,
    /// Identifies this open instance; stale grace timers carry an older one.
    pub open_generation: u64,
}

/// What a trade event did to the realized ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeEffects {
    pub realized: Decimal,
    /// False when the trade id had been seen before (re-delivery).
    pub first_delivery: bool,
}

#[derive(Debug, Default)]
struct AccountState {
    positions: HashMap<ContractId, Position>,
    orders: HashMap<OrderId, Order>,
    daily: DailyPnl,
    /// Timestamps of recent trades, evicted past the hour horizon.
    trade_times: VecDeque<DateTime<Utc>>,
    session_trades: u32,
    seen_trades: HashSet<TradeId>,
    voided_trades: HashSet<TradeId>,
    open_generations: HashMap<ContractId, u64>,
    next_generation: u64,
    flags: Option<AccountFlags>,
}

/// Read-only view handed to the rule evaluation step.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub positions: Vec<Position>,
    pub open_orders: Vec<Order>,
    pub realized: Decimal,
    pub trades_last_minute: u32,
    pub trades_last_hour: u32,
    pub trades_this_session: u32,
}

/// Authoritative in-memory state for every monitored account, write-through
/// to the persistence store on each decision-path mutation.
///
/// All mutators run on the owning account's dispatcher worker, so per-account
/// access is already serialized; the lock only guards cross-account map
/// structure.
pub struct StateStore {
    accounts: RwLock<HashMap<AccountId, AccountState>>,
    pnl_repository: Arc<dyn DailyPnlRepository>,
    activity_repository: Arc<dyn TradeActivityRepository>,
    snapshot_repository: Arc<dyn SnapshotRepository>,
}

impl StateStore {
    pub fn new(
        pnl_repository: Arc<dyn DailyPnlRepository>,
        activity_repository: Arc<dyn TradeActivityRepository>,
        snapshot_repository: Arc<dyn SnapshotRepository>,
    ) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            pnl_repository,
            activity_repository,
            snapshot_repository,
        }
    }

    /// Rebuilds state from the persistence store. The result is a legal
    /// predecessor of the crash-time state; reconciliation against the live
    /// gateway runs before any new event is processed.
    pub async fn restore(
        &self,
        session_dates: &HashMap<AccountId, NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut accounts: HashMap<AccountId, AccountState> = HashMap::new();

        for position in self.snapshot_repository.load_positions().await? {
            accounts
                .entry(position.account_id)
                .or_default()
                .positions
                .insert(position.contract_id.clone(), position);
        }
        for order in self.snapshot_repository.load_orders().await? {
            accounts
                .entry(order.account_id)
                .or_default()
                .orders
                .insert(order.order_id, order);
        }
        for (account_id, date, realized) in self.pnl_repository.load_all().await? {
            // Only the current session's row is live; older rows are history.
            if session_dates.get(&account_id) == Some(&date) {
                accounts.entry(account_id).or_default().daily = DailyPnl::restore(date, realized);
            }
        }
        for (&account_id, state) in accounts.iter_mut() {
            let since = now - chrono::Duration::hours(1);
            for (start, count) in self.activity_repository.load_buckets(account_id, since).await? {
                for _ in 0..count {
                    state.trade_times.push_back(start);
                }
            }
            state.session_trades = self.activity_repository.load_session_count(account_id).await?;
        }

        *self.accounts.write().await = accounts;
        Ok(())
    }

    /// Upserts a position; size 0 prunes the record. Persists before
    /// returning.
    pub async fn apply_position(&self, position: &Position) -> Result<PositionTransition> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.entry(position.account_id).or_default();
        let was_open = state
            .positions
            .get(&position.contract_id)
            .is_some_and(|p| p.size > 0);

        if position.size == 0 {
            state.positions.remove(&position.contract_id);
            self.snapshot_repository
                .delete_position(position.account_id, &position.contract_id)
                .await?;
            let generation = state
                .open_generations
                .get(&position.contract_id)
                .copied()
                .unwrap_or(0);
            return Ok(PositionTransition {
                opened: false,
                closed: was_open,
                open_generation: generation,
            });
        }

        state
            .positions
            .insert(position.contract_id.clone(), position.clone());
        self.snapshot_repository.upsert_position(position).await?;

        let opened = !was_open;
        let generation = if opened {
            state.next_generation += 1;
            state
                .open_generations
                .insert(position.contract_id.clone(), state.next_generation);
            state.next_generation
        } else {
            state
                .open_generations
                .get(&position.contract_id)
                .copied()
                .unwrap_or(0)
        };

        Ok(PositionTransition {
            opened,
            closed: false,
            open_generation: generation,
        })
    }

    /// Upserts an order. Transitions out of a terminal status are rejected
    /// (logged, state unchanged) since terminal states never transition.
    pub async fn apply_order(&self, order: &Order) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.entry(order.account_id).or_default();

        if let Some(existing) = state.orders.get(&order.order_id)
            && existing.status.is_terminal()
            && existing.status != order.status
        {
            warn!(
                account_id = order.account_id,
                order_id = order.order_id,
                from = %existing.status,
                to = %order.status,
                "rejected transition out of terminal order status"
            );
            return Ok(());
        }

        state.orders.insert(order.order_id, order.clone());
        self.snapshot_repository.upsert_order(order).await?;
        Ok(())
    }

    /// Appends a trade: updates the realized ledger (full turns), the void
    /// set, and the rolling trade counts. Everything is durable before this
    /// returns.
    pub async fn apply_trade(
        &self,
        trade: &Trade,
        session_date: NaiveDate,
    ) -> Result<TradeEffects> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.entry(trade.account_id).or_default();

        if state.daily.session_date != Some(session_date) {
            state.daily.reset(session_date);
        }

        let first_delivery = state.seen_trades.insert(trade.trade_id);
        let mut realized = state.daily.realized();

        if trade.voided {
            if state.voided_trades.insert(trade.trade_id) {
                realized = state.daily.void_trade(trade.trade_id);
                self.pnl_repository
                    .save(trade.account_id, session_date, realized)
                    .await?;
                debug!(
                    account_id = trade.account_id,
                    trade_id = trade.trade_id,
                    realized = %realized,
                    "trade voided, contribution reversed"
                );
            }
            return Ok(TradeEffects {
                realized,
                first_delivery,
            });
        }

        if first_delivery {
            if let Some(pnl) = trade.pnl {
                realized = state.daily.add_trade(trade.trade_id, pnl);
                self.pnl_repository
                    .save(trade.account_id, session_date, realized)
                    .await?;
            }
            // Null-P&L half turns still count toward the windows.
            state.trade_times.push_back(trade.executed_at);
            state.session_trades += 1;
            let horizon = trade.executed_at - chrono::Duration::hours(1);
            while state.trade_times.front().is_some_and(|t| *t < horizon) {
                state.trade_times.pop_front();
            }
            let session_key = session_date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or(trade.executed_at);
            self.activity_repository
                .record_trade(trade.account_id, trade.executed_at, session_key)
                .await?;
        }

        Ok(TradeEffects {
            realized,
            first_delivery,
        })
    }

    pub async fn apply_flags(&self, flags: &AccountFlags) {
        let mut accounts = self.accounts.write().await;
        accounts.entry(flags.account_id).or_default().flags = Some(flags.clone());
    }

    /// Latest gateway-reported flags for the account, for the status
    /// frontend.
    pub async fn account_flags(&self, account_id: AccountId) -> Option<AccountFlags> {
        let accounts = self.accounts.read().await;
        accounts.get(&account_id)?.flags.clone()
    }

    /// Current open-instance generation for a contract, if any.
    pub async fn open_generation(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
    ) -> Option<u64> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&account_id)?
            .open_generations
            .get(contract_id)
            .copied()
    }

    /// Whether the account currently holds a non-zero position in the
    /// contract. Used by the executor's skip-if-flat check.
    pub async fn holds_position(&self, account_id: AccountId, contract_id: &ContractId) -> bool {
        let accounts = self.accounts.read().await;
        accounts
            .get(&account_id)
            .and_then(|s| s.positions.get(contract_id))
            .is_some_and(|p| p.size > 0)
    }

    pub async fn open_positions(&self, account_id: AccountId) -> Vec<Position> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&account_id)
            .map(|s| s.positions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn open_orders(&self, account_id: AccountId) -> Vec<Order> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&account_id)
            .map(|s| {
                s.orders
                    .values()
                    .filter(|o| o.is_open())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every contract held by any account; drives market-data subscriptions.
    pub async fn all_held_contracts(&self) -> HashSet<ContractId> {
        let accounts = self.accounts.read().await;
        accounts
            .values()
            .flat_map(|s| s.positions.keys().cloned())
            .collect()
    }

    /// Snapshot for the rule step, with windows evicted as of `now`.
    pub async fn snapshot(&self, account_id: AccountId, now: DateTime<Utc>) -> AccountSnapshot {
        let mut accounts = self.accounts.write().await;
        let Some(state) = accounts.get_mut(&account_id) else {
            return AccountSnapshot {
                positions: Vec::new(),
                open_orders: Vec::new(),
                realized: Decimal::ZERO,
                trades_last_minute: 0,
                trades_last_hour: 0,
                trades_this_session: 0,
            };
        };

        let hour_horizon = now - chrono::Duration::hours(1);
        while state.trade_times.front().is_some_and(|t| *t < hour_horizon) {
            state.trade_times.pop_front();
        }
        let minute_horizon = now - chrono::Duration::minutes(1);
        let trades_last_minute = state
            .trade_times
            .iter()
            .filter(|t| **t >= minute_horizon)
            .count() as u32;

        AccountSnapshot {
            positions: state.positions.values().cloned().collect(),
            open_orders: state
                .orders
                .values()
                .filter(|o| o.is_open())
                .cloned()
                .collect(),
            realized: state.daily.realized(),
            trades_last_minute,
            trades_last_hour: state.trade_times.len() as u32,
            trades_this_session: state.session_trades,
        }
    }

    /// Session rollover: zero the realized ledger and the session window.
    pub async fn reset_session(
        &self,
        account_id: AccountId,
        new_session_date: NaiveDate,
    ) -> Result<()> {
        // Persist the cleared state first.
        self.pnl_repository
            .save(account_id, new_session_date, Decimal::ZERO)
            .await?;
        self.activity_repository.clear_session(account_id).await?;

        let mut accounts = self.accounts.write().await;
        let state = accounts.entry(account_id).or_default();
        state.daily.reset(new_session_date);
        state.session_trades = 0;
        state.seen_trades.clear();
        state.voided_trades.clear();
        Ok(())
    }

    /// Reconciliation: the gateway's view wins. In-memory entries the
    /// gateway no longer reports are pruned; everything reported overwrites.
    pub async fn reconcile(
        &self,
        account_id: AccountId,
        positions: Vec<Position>,
        orders: Vec<Order>,
    ) -> Result<()> {
        self.snapshot_repository
            .replace_positions(account_id, &positions)
            .await?;
        self.snapshot_repository
            .replace_orders(account_id, &orders)
            .await?;

        let mut accounts = self.accounts.write().await;
        let state = accounts.entry(account_id).or_default();

        let reported: HashSet<&ContractId> = positions.iter().map(|p| &p.contract_id).collect();
        state.positions.retain(|c, _| reported.contains(c));
        for position in positions {
            // A contract the gateway reports that we did not know is a fresh
            // open instance as far as grace timers are concerned.
            if !state.open_generations.contains_key(&position.contract_id) {
                state.next_generation += 1;
                state
                    .open_generations
                    .insert(position.contract_id.clone(), state.next_generation);
            }
            state
                .positions
                .insert(position.contract_id.clone(), position);
        }

        state.orders = orders.into_iter().map(|o| (o.order_id, o)).collect();
        Ok(())
    }
}
