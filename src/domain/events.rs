use crate::domain::types::{
    AccountFlags, AccountId, ContractId, Order, Position, Quote, Trade,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything the dispatcher processes, gateway-pushed and synthetic alike.
///
/// Synthetic variants are posted by the timer service and the reset scheduler
/// into the same per-account queue as gateway events, so every state mutation
/// flows through the dispatcher in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskEvent {
    Trade(Trade),
    Position(Position),
    Order(Order),
    AccountFlags(AccountFlags),
    Quote(Quote),
    /// Stop-loss grace period elapsed for a position open instance.
    GraceExpired {
        account_id: AccountId,
        contract_id: ContractId,
        /// Identifies the flat-to-nonzero transition the grace timer was
        /// started for; a position reopened later gets a fresh id.
        open_generation: u64,
    },
    /// Minute-resolution wall clock tick for session-window checks.
    SessionBoundary { account_id: AccountId, at: DateTime<Utc> },
    /// Periodic tick driving unrealized P&L evaluation.
    UnrealizedTick { account_id: AccountId },
    /// The account crossed its daily session rollover.
    ResetRollover {
        account_id: AccountId,
        rollover: DateTime<Utc>,
    },
    /// A cooldown lockout reached its expiry.
    LockoutExpired { account_id: AccountId },
}

impl RiskEvent {
    /// The account this event belongs to. Quotes are contract-scoped; the
    /// ingress router fans them out per interested account, so by the time an
    /// event reaches a queue it always has an owner.
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            RiskEvent::Trade(t) => Some(t.account_id),
            RiskEvent::Position(p) => Some(p.account_id),
            RiskEvent::Order(o) => Some(o.account_id),
            RiskEvent::AccountFlags(f) => Some(f.account_id),
            RiskEvent::Quote(_) => None,
            RiskEvent::GraceExpired { account_id, .. }
            | RiskEvent::SessionBoundary { account_id, .. }
            | RiskEvent::UnrealizedTick { account_id }
            | RiskEvent::ResetRollover { account_id, .. }
            | RiskEvent::LockoutExpired { account_id } => Some(*account_id),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            RiskEvent::Trade(_) => EventKind::Trade,
            RiskEvent::Position(_) => EventKind::Position,
            RiskEvent::Order(_) => EventKind::Order,
            RiskEvent::AccountFlags(_) => EventKind::AccountFlags,
            RiskEvent::Quote(_) => EventKind::Quote,
            RiskEvent::GraceExpired { .. } => EventKind::GraceExpired,
            RiskEvent::SessionBoundary { .. } => EventKind::SessionBoundary,
            RiskEvent::UnrealizedTick { .. } => EventKind::UnrealizedTick,
            RiskEvent::ResetRollover { .. } => EventKind::ResetRollover,
            RiskEvent::LockoutExpired { .. } => EventKind::LockoutExpired,
        }
    }
}

/// Discriminant used by rules to declare which events they consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Trade,
    Position,
    Order,
    AccountFlags,
    Quote,
    GraceExpired,
    SessionBoundary,
    UnrealizedTick,
    ResetRollover,
    LockoutExpired,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_events_have_no_owner() {
        let quote = Quote {
            contract_id: "CON.F.US.MNQ.U25".to_string(),
            last: rust_decimal_macros::dec!(21000),
            best_bid: None,
            best_ask: None,
            source_timestamp: Utc::now(),
            ingested_at: Utc::now(),
        };
        assert_eq!(RiskEvent::Quote(quote).account_id(), None);
    }

    #[test]
    fn synthetic_events_carry_their_account() {
        let event = RiskEvent::LockoutExpired { account_id: 42 };
        assert_eq!(event.account_id(), Some(42));
        assert_eq!(event.kind(), EventKind::LockoutExpired);
    }
}
