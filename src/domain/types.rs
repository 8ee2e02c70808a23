use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway-side account identifier (positive integer, unique).
pub type AccountId = i64;

/// Order identifier, unique within an account.
pub type OrderId = i64;

/// Trade identifier, unique within an account.
pub type TradeId = i64;

/// Gateway-issued contract identifier, e.g. `CON.F.US.MNQ.U25`.
pub type ContractId = String;

/// Extracts the human symbol from a gateway contract id.
///
/// Contract ids are dot-separated (`CON.F.US.MNQ.U25`); the symbol is the
/// fourth segment. Ids that do not follow the scheme are returned whole so
/// symbol-scoped rules still have something stable to key on.
pub fn symbol_of_contract(contract_id: &str) -> &str {
    let mut parts = contract_id.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(_), Some(symbol)) if !symbol.is_empty() => symbol,
        _ => contract_id,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Wire encoding: 1 = long, 2 = short.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            1 => Some(PositionSide::Long),
            2 => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy side (wire 0).
    Bid,
    /// Sell side (wire 1).
    Ask,
}

impl OrderSide {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(OrderSide::Bid),
            1 => Some(OrderSide::Ask),
            _ => None,
        }
    }

    /// The side a protective stop must be on to cover a position.
    pub fn protecting(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderSide::Ask,
            PositionSide::Short => OrderSide::Bid,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Bid => write!(f, "BUY"),
            OrderSide::Ask => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    None,
    Open,
    Filled,
    Cancelled,
    Expired,
    Rejected,
    Pending,
}

impl OrderStatus {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(OrderStatus::None),
            1 => Some(OrderStatus::Open),
            2 => Some(OrderStatus::Filled),
            3 => Some(OrderStatus::Cancelled),
            4 => Some(OrderStatus::Expired),
            5 => Some(OrderStatus::Rejected),
            6 => Some(OrderStatus::Pending),
            _ => None,
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    Stop,
    TrailingStop,
}

impl OrderType {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            1 => Some(OrderType::Limit),
            2 => Some(OrderType::Market),
            3 => Some(OrderType::StopLimit),
            4 => Some(OrderType::Stop),
            5 => Some(OrderType::TrailingStop),
            _ => None,
        }
    }

    /// Stop-kind orders satisfy stop-loss protection checks.
    pub fn is_stop_kind(&self) -> bool {
        matches!(
            self,
            OrderType::Stop | OrderType::StopLimit | OrderType::TrailingStop
        )
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::TrailingStop => write!(f, "TRAILING_STOP"),
        }
    }
}

/// An open position. At most one per `(account, contract)`; size 0 means flat
/// and the record is pruned from the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub contract_id: ContractId,
    pub side: PositionSide,
    pub size: u32,
    pub average_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn symbol(&self) -> &str {
        symbol_of_contract(&self.contract_id)
    }

    pub fn is_flat(&self) -> bool {
        self.size == 0
    }
}

/// A working or historical order as reported by the user-events hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub contract_id: ContractId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub size: u32,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub fill_volume: u32,
    pub filled_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn symbol(&self) -> &str {
        symbol_of_contract(&self.contract_id)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::Open | OrderStatus::Pending)
    }
}

/// An executed trade. `pnl` is `None` for the opening half-turn; full turns
/// carry the realized amount. Immutable after insertion except `voided` flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub account_id: AccountId,
    pub contract_id: ContractId,
    pub price: Decimal,
    pub pnl: Option<Decimal>,
    pub fees: Decimal,
    pub side: OrderSide,
    pub size: u32,
    pub voided: bool,
    pub order_id: OrderId,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn symbol(&self) -> &str {
        symbol_of_contract(&self.contract_id)
    }
}

/// Latest market quote for a contract. Non-persistent, overwritten on every
/// update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub contract_id: ContractId,
    pub last: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub source_timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

/// Tick metadata for a contract, fetched from the gateway contract search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub contract_id: ContractId,
    pub symbol: String,
    pub tick_size: Decimal,
    pub tick_value: Decimal,
    pub active: bool,
}

/// Per-account flags pushed by the user-events hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountFlags {
    pub account_id: AccountId,
    pub name: String,
    pub balance: Decimal,
    pub can_trade: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockoutKind {
    /// In force until an absolute wall-clock instant (or forever).
    Hard,
    /// Duration-based, auto-clears when the cooldown elapses.
    Cooldown,
    /// Scoped to a single symbol, any number may coexist.
    Symbol,
}

impl fmt::Display for LockoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockoutKind::Hard => write!(f, "hard"),
            LockoutKind::Cooldown => write!(f, "cooldown"),
            LockoutKind::Symbol => write!(f, "symbol"),
        }
    }
}

/// A prohibition on trading. Persisted immediately on creation and mutation
/// so it outlasts crashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lockout {
    pub account_id: AccountId,
    /// `Some` only for `LockoutKind::Symbol`.
    pub symbol: Option<String>,
    pub kind: LockoutKind,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Lockout {
    /// Sentinel expiry meaning "cleared only by explicit action".
    pub fn never() -> DateTime<Utc> {
        DateTime::<Utc>::MAX_UTC
    }

    pub fn is_manual_only(&self) -> bool {
        self.expires_at == Self::never()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_manual_only() && self.expires_at <= now
    }
}

/// Rolling trade-count window kinds used by the frequency rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    Minute,
    Hour,
    Session,
}

impl WindowKind {
    /// Window horizon. `Session` has no fixed horizon; it is cleared by the
    /// reset scheduler at rollover.
    pub fn horizon(&self) -> Option<chrono::Duration> {
        match self {
            WindowKind::Minute => Some(chrono::Duration::minutes(1)),
            WindowKind::Hour => Some(chrono::Duration::hours(1)),
            WindowKind::Session => None,
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKind::Minute => write!(f, "minute"),
            WindowKind::Hour => write!(f, "hour"),
            WindowKind::Session => write!(f, "session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_extraction_from_contract_id() {
        assert_eq!(symbol_of_contract("CON.F.US.MNQ.U25"), "MNQ");
        assert_eq!(symbol_of_contract("CON.F.US.RTY.U25"), "RTY");
        // Not dot-separated: returned whole
        assert_eq!(symbol_of_contract("MNQU25"), "MNQU25");
        assert_eq!(symbol_of_contract(""), "");
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::None.is_terminal());
    }

    #[test]
    fn stop_kinds() {
        assert!(OrderType::Stop.is_stop_kind());
        assert!(OrderType::TrailingStop.is_stop_kind());
        assert!(OrderType::StopLimit.is_stop_kind());
        assert!(!OrderType::Limit.is_stop_kind());
        assert!(!OrderType::Market.is_stop_kind());
    }

    #[test]
    fn protecting_side_convention() {
        // A long is covered by a sell stop, a short by a buy stop.
        assert_eq!(OrderSide::protecting(PositionSide::Long), OrderSide::Ask);
        assert_eq!(OrderSide::protecting(PositionSide::Short), OrderSide::Bid);
    }

    #[test]
    fn lockout_sentinel_expiry() {
        let lockout = Lockout {
            account_id: 1,
            symbol: None,
            kind: LockoutKind::Hard,
            reason: "test".to_string(),
            expires_at: Lockout::never(),
            created_at: Utc::now(),
        };
        assert!(lockout.is_manual_only());
        assert!(!lockout.is_expired(Utc::now()));
    }

    #[test]
    fn wire_enum_decoding() {
        assert_eq!(PositionSide::from_wire(1), Some(PositionSide::Long));
        assert_eq!(PositionSide::from_wire(2), Some(PositionSide::Short));
        assert_eq!(PositionSide::from_wire(3), None);
        assert_eq!(OrderSide::from_wire(0), Some(OrderSide::Bid));
        assert_eq!(OrderSide::from_wire(1), Some(OrderSide::Ask));
        assert_eq!(OrderType::from_wire(4), Some(OrderType::Stop));
        assert_eq!(OrderStatus::from_wire(6), Some(OrderStatus::Pending));
        assert_eq!(OrderStatus::from_wire(99), None);
    }
}
