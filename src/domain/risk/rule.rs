use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::pnl::{self, MarkInput, MarkResult};
use crate::domain::session::{HolidayCalendar, SessionClock};
use crate::domain::types::{
    AccountId, ContractId, ContractSpec, Order, OrderId, Position, Quote,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// A typed instruction to the enforcement executor.
#[derive(Debug, Clone, PartialEq)]
pub enum RemediationIntent {
    ClosePosition {
        account_id: AccountId,
        contract_id: ContractId,
    },
    PartialClose {
        account_id: AccountId,
        contract_id: ContractId,
        size: u32,
    },
    CloseAll {
        account_id: AccountId,
    },
    CancelOrder {
        account_id: AccountId,
        order_id: OrderId,
    },
    CancelAll {
        account_id: AccountId,
    },
    ModifyOrder {
        account_id: AccountId,
        order_id: OrderId,
        changes: OrderChanges,
    },
}

impl RemediationIntent {
    pub fn account_id(&self) -> AccountId {
        match self {
            RemediationIntent::ClosePosition { account_id, .. }
            | RemediationIntent::PartialClose { account_id, .. }
            | RemediationIntent::CloseAll { account_id }
            | RemediationIntent::CancelOrder { account_id, .. }
            | RemediationIntent::CancelAll { account_id }
            | RemediationIntent::ModifyOrder { account_id, .. } => *account_id,
        }
    }

    /// Short label for logs and the enforcement audit table.
    pub fn kind(&self) -> &'static str {
        match self {
            RemediationIntent::ClosePosition { .. } => "close_position",
            RemediationIntent::PartialClose { .. } => "partial_close",
            RemediationIntent::CloseAll { .. } => "close_all",
            RemediationIntent::CancelOrder { .. } => "cancel_order",
            RemediationIntent::CancelAll { .. } => "cancel_all",
            RemediationIntent::ModifyOrder { .. } => "modify_order",
        }
    }

    /// The fingerprint target component: contract, order, or `*`.
    pub fn target(&self) -> String {
        match self {
            RemediationIntent::ClosePosition { contract_id, .. }
            | RemediationIntent::PartialClose { contract_id, .. } => contract_id.clone(),
            RemediationIntent::CancelOrder { order_id, .. }
            | RemediationIntent::ModifyOrder { order_id, .. } => order_id.to_string(),
            RemediationIntent::CloseAll { .. } | RemediationIntent::CancelAll { .. } => {
                "*".to_string()
            }
        }
    }
}

/// Requested changes for an order modification. `None` fields are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderChanges {
    pub stop_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub trail_price: Option<Decimal>,
    pub size: Option<u32>,
}

/// A lockout a breach wants placed (or, for the auth guard, lifted).
#[derive(Debug, Clone, PartialEq)]
pub enum LockoutIntent {
    Hard {
        reason: String,
        until: DateTime<Utc>,
    },
    Cooldown {
        reason: String,
        duration: chrono::Duration,
    },
    Symbol {
        symbol: String,
        reason: String,
        until: DateTime<Utc>,
    },
    /// Clear every lockout whose reason is attributed to `rule`.
    ClearAttributed { rule: &'static str },
}

/// A rule's positive finding: a limit was crossed.
///
/// `remediations` are immediate actions (closes, cancels, modifies);
/// `lockout` is the prohibition to place. For position and order events the
/// first breach carrying immediate remediations wins, while lockout intents
/// from every breaching rule coexist.
#[derive(Debug, Clone)]
pub struct Breach {
    pub rule: &'static str,
    pub reason: String,
    pub remediations: Vec<RemediationIntent>,
    pub lockout: Option<LockoutIntent>,
}

impl Breach {
    pub fn is_immediate(&self) -> bool {
        !self.remediations.is_empty()
    }
}

/// Read-only snapshot of one account's state, taken at the top of the rule
/// evaluation step. Rules never mutate state; they only decide.
pub struct RuleContext<'a> {
    pub account_id: AccountId,
    pub now: DateTime<Utc>,
    pub session_date: NaiveDate,
    /// Open positions for this account.
    pub positions: &'a [Position],
    /// Open (working) orders for this account.
    pub orders: &'a [Order],
    /// Realized P&L so far this session.
    pub realized_pnl: Decimal,
    /// Rolling trade counts at `now`.
    pub trades_last_minute: u32,
    pub trades_last_hour: u32,
    pub trades_this_session: u32,
    pub quotes: &'a HashMap<ContractId, Quote>,
    pub specs: &'a HashMap<ContractId, ContractSpec>,
    pub clock: SessionClock,
    pub holidays: &'a HolidayCalendar,
    /// Quotes older than this cannot support an unrealized-P&L decision.
    pub quote_max_age: chrono::Duration,
}

impl<'a> RuleContext<'a> {
    /// Total absolute contract count across open positions.
    pub fn total_open_size(&self) -> u32 {
        self.positions.iter().map(|p| p.size).sum()
    }

    /// Open size per symbol.
    pub fn open_size_for_symbol(&self, symbol: &str) -> u32 {
        self.positions
            .iter()
            .filter(|p| p.symbol() == symbol)
            .map(|p| p.size)
            .sum()
    }

    pub fn last_price(&self, contract_id: &str) -> Option<Decimal> {
        self.quotes.get(contract_id).map(|q| q.last)
    }

    /// Marks every open position to its latest quote. Quotes missing or
    /// older than `quote_max_age` contribute zero and flag the result
    /// partial; callers must not breach on a partial mark.
    pub fn unrealized(&self) -> MarkResult {
        let inputs = self.positions.iter().map(|p| {
            let quote = self.quotes.get(&p.contract_id).filter(|q| {
                self.now.signed_duration_since(q.ingested_at) <= self.quote_max_age
            });
            MarkInput {
                side: p.side,
                size: p.size,
                average_price: p.average_price,
                last_price: quote.map(|q| q.last),
                spec: self.specs.get(&p.contract_id),
            }
        });
        pnl::mark_account(inputs)
    }

    /// The most recent open stop-kind order on `side` for `contract_id`.
    /// Ties on update timestamp resolve to the highest order id; the caller
    /// logs ambiguity.
    pub fn latest_stop_order(
        &self,
        contract_id: &str,
        side: crate::domain::types::OrderSide,
    ) -> Option<&Order> {
        self.orders
            .iter()
            .filter(|o| {
                o.contract_id == contract_id
                    && o.side == side
                    && o.order_type.is_stop_kind()
                    && o.is_open()
            })
            .max_by_key(|o| (o.updated_at, o.order_id))
    }
}

/// One independent risk rule.
///
/// Rules are pure decisions over the context snapshot: no I/O, no state
/// mutation, at most one breach per event. Evaluation order across rules is
/// configuration order.
pub trait RiskRule: Send + Sync + std::fmt::Debug {
    /// Stable identifier used in configuration, lockout attribution, and logs.
    fn id(&self) -> &'static str;

    /// The event kinds this rule consumes.
    fn inputs(&self) -> &'static [EventKind];

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach>;

    /// Grace duration this rule wants a timer started for when a position
    /// transitions flat → non-zero. Only the stop-loss grace rule returns
    /// `Some`; the dispatcher owns the timer itself.
    fn grace_period(&self) -> Option<std::time::Duration> {
        None
    }
}

/// Formats a lockout reason with rule attribution, e.g.
/// `[daily_realized_loss] realized -550 <= limit -500`.
pub fn attributed_reason(rule: &str, detail: &str) -> String {
    format!("[{}] {}", rule, detail)
}

/// True when `reason` was produced by `rule` via [`attributed_reason`].
pub fn is_attributed_to(reason: &str, rule: &str) -> bool {
    reason
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .is_some_and(|(id, _)| id == rule)
}
