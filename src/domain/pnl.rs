//! Realized and unrealized P&L evaluation.
//!
//! Realized P&L is a per-(account, session-date) sum over unvoided full-turn
//! trades. Unrealized P&L marks open positions to the latest quote using the
//! contract's tick size and value. All arithmetic uses decimals rounded to
//! 10 fractional digits.

use crate::domain::types::{ContractSpec, PositionSide, TradeId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Decimal places carried through P&L arithmetic.
pub const PNL_SCALE: u32 = 10;

/// Running realized P&L for one account and session date.
///
/// Contributions are tracked per trade so a later `voided` flip can reverse
/// exactly what the trade added.
#[derive(Debug, Clone, Default)]
pub struct DailyPnl {
    pub session_date: Option<NaiveDate>,
    realized: Decimal,
    contributions: HashMap<TradeId, Decimal>,
}

impl DailyPnl {
    pub fn new(session_date: NaiveDate) -> Self {
        Self {
            session_date: Some(session_date),
            realized: Decimal::ZERO,
            contributions: HashMap::new(),
        }
    }

    /// Restore from a persisted running total. Per-trade contributions are
    /// not persisted; voids of pre-crash trades cannot be reversed, which
    /// errs on the side of keeping the loss on the books.
    pub fn restore(session_date: NaiveDate, realized: Decimal) -> Self {
        Self {
            session_date: Some(session_date),
            realized,
            contributions: HashMap::new(),
        }
    }

    pub fn realized(&self) -> Decimal {
        self.realized
    }

    /// Adds a full-turn trade's P&L and returns the new running total.
    /// Re-delivery of a trade id already on the books is a no-op.
    pub fn add_trade(&mut self, trade_id: TradeId, pnl: Decimal) -> Decimal {
        if !self.contributions.contains_key(&trade_id) {
            let pnl = pnl.round_dp(PNL_SCALE);
            self.contributions.insert(trade_id, pnl);
            self.realized = (self.realized + pnl).round_dp(PNL_SCALE);
        }
        self.realized
    }

    /// Reverses a previously-added trade's contribution. Unknown trade ids
    /// are ignored (the trade may predate the session or the process).
    pub fn void_trade(&mut self, trade_id: TradeId) -> Decimal {
        if let Some(pnl) = self.contributions.remove(&trade_id) {
            self.realized = (self.realized - pnl).round_dp(PNL_SCALE);
        }
        self.realized
    }

    /// Session rollover: drop everything.
    pub fn reset(&mut self, session_date: NaiveDate) {
        self.session_date = Some(session_date);
        self.realized = Decimal::ZERO;
        self.contributions.clear();
    }
}

/// Outcome of an unrealized P&L evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkResult {
    pub total: Decimal,
    /// True when at least one open position had no usable quote and
    /// contributed zero. Rules must not act on a partial mark.
    pub partial: bool,
}

/// One open position's inputs to the mark.
#[derive(Debug, Clone, Copy)]
pub struct MarkInput<'a> {
    pub side: PositionSide,
    pub size: u32,
    pub average_price: Decimal,
    pub last_price: Option<Decimal>,
    pub spec: Option<&'a ContractSpec>,
}

/// Marks a single position to `last_price`.
///
/// `((price − entry) / tick_size) × tick_value × size`, sign inverted for
/// shorts. Returns `None` when the quote or contract spec is missing.
pub fn mark_position(input: &MarkInput<'_>) -> Option<Decimal> {
    let last = input.last_price?;
    let spec = input.spec?;
    if spec.tick_size.is_zero() {
        return None;
    }

    let diff = match input.side {
        PositionSide::Long => last - input.average_price,
        PositionSide::Short => input.average_price - last,
    };
    let ticks = (diff / spec.tick_size).round_dp(PNL_SCALE);
    Some((ticks * spec.tick_value * Decimal::from(input.size)).round_dp(PNL_SCALE))
}

/// Sums marks over all open positions. Positions without a fresh quote or a
/// known spec contribute zero and flip `partial`.
pub fn mark_account<'a, I>(positions: I) -> MarkResult
where
    I: IntoIterator<Item = MarkInput<'a>>,
{
    let mut total = Decimal::ZERO;
    let mut partial = false;
    for input in positions {
        match mark_position(&input) {
            Some(pnl) => total = (total + pnl).round_dp(PNL_SCALE),
            None => partial = true,
        }
    }
    MarkResult { total, partial }
}
