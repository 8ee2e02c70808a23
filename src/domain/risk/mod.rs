//! The rule engine: twelve independent rules mapping inbound events to
//! breach decisions with attached remediation intents.

pub mod auth_loss_guard;
pub mod cooldown_after_loss;
pub mod daily_realized_loss;
pub mod daily_unrealized_loss;
pub mod max_contracts;
pub mod max_contracts_per_instrument;
pub mod max_unrealized_profit;
pub mod no_stop_loss_grace;
pub mod rule;
pub mod session_block;
pub mod symbol_blocks;
pub mod trade_frequency;
pub mod trade_management;

pub use rule::{
    Breach, LockoutIntent, OrderChanges, RemediationIntent, RiskRule, RuleContext,
};

#[cfg(test)]
pub(crate) mod testkit {
    use crate::domain::risk::rule::RuleContext;
    use crate::domain::session::{HolidayCalendar, SessionClock, SessionWindow};
    use crate::domain::types::{
        AccountId, ContractId, ContractSpec, Order, OrderSide, OrderStatus, OrderType, Position,
        PositionSide, Quote, symbol_of_contract,
    };
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};
    use chrono_tz::America::New_York;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    pub const MNQ: &str = "CON.F.US.MNQ.U25";
    pub const ES: &str = "CON.F.US.ES.U25";
    pub const RTY: &str = "CON.F.US.RTY.U25";

    /// Owns the borrowed pieces of a [`RuleContext`] so tests can build one
    /// incrementally.
    pub struct CtxFixture {
        pub account_id: AccountId,
        pub now: DateTime<Utc>,
        pub positions: Vec<Position>,
        pub orders: Vec<Order>,
        pub realized: Decimal,
        pub trades_last_minute: u32,
        pub trades_last_hour: u32,
        pub trades_this_session: u32,
        pub quotes: HashMap<ContractId, Quote>,
        pub specs: HashMap<ContractId, ContractSpec>,
        pub holidays: HolidayCalendar,
        pub clock: SessionClock,
    }

    impl CtxFixture {
        /// A fixture at 14:00 ET on a summer Monday, rollover 17:00 ET.
        pub fn new(account_id: AccountId) -> Self {
            Self {
                account_id,
                now: Utc.with_ymd_and_hms(2025, 7, 14, 18, 0, 0).single().unwrap(),
                positions: Vec::new(),
                orders: Vec::new(),
                realized: Decimal::ZERO,
                trades_last_minute: 0,
                trades_last_hour: 0,
                trades_this_session: 0,
                quotes: HashMap::new(),
                specs: HashMap::new(),
                holidays: HolidayCalendar::default(),
                clock: SessionClock::new(
                    New_York,
                    NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                ),
            }
        }

        pub fn with_position(
            mut self,
            contract_id: &str,
            side: PositionSide,
            size: u32,
            entry: Decimal,
        ) -> Self {
            self.positions.push(position(
                self.account_id,
                contract_id,
                side,
                size,
                entry,
                self.now,
            ));
            self
        }

        pub fn with_quote(mut self, contract_id: &str, last: Decimal) -> Self {
            self.quotes.insert(
                contract_id.to_string(),
                Quote {
                    contract_id: contract_id.to_string(),
                    last,
                    best_bid: Some(last - dec!(0.25)),
                    best_ask: Some(last + dec!(0.25)),
                    source_timestamp: self.now,
                    ingested_at: self.now,
                },
            );
            self
        }

        pub fn with_spec(
            mut self,
            contract_id: &str,
            tick_size: Decimal,
            tick_value: Decimal,
        ) -> Self {
            self.specs.insert(
                contract_id.to_string(),
                ContractSpec {
                    contract_id: contract_id.to_string(),
                    symbol: symbol_of_contract(contract_id).to_string(),
                    tick_size,
                    tick_value,
                    active: true,
                },
            );
            self
        }

        pub fn with_order(mut self, order: Order) -> Self {
            self.orders.push(order);
            self
        }

        pub fn ctx(&self) -> RuleContext<'_> {
            RuleContext {
                account_id: self.account_id,
                now: self.now,
                session_date: self.clock.session_date(self.now),
                positions: &self.positions,
                orders: &self.orders,
                realized_pnl: self.realized,
                trades_last_minute: self.trades_last_minute,
                trades_last_hour: self.trades_last_hour,
                trades_this_session: self.trades_this_session,
                quotes: &self.quotes,
                specs: &self.specs,
                clock: self.clock,
                holidays: &self.holidays,
                quote_max_age: chrono::Duration::seconds(10),
            }
        }
    }

    pub fn position(
        account_id: AccountId,
        contract_id: &str,
        side: PositionSide,
        size: u32,
        entry: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Position {
        Position {
            account_id,
            contract_id: contract_id.to_string(),
            side,
            size,
            average_price: entry,
            opened_at,
        }
    }

    pub fn stop_order(
        account_id: AccountId,
        order_id: i64,
        contract_id: &str,
        side: OrderSide,
        stop_price: Decimal,
        at: DateTime<Utc>,
    ) -> Order {
        Order {
            order_id,
            account_id,
            contract_id: contract_id.to_string(),
            side,
            order_type: OrderType::Stop,
            status: OrderStatus::Open,
            size: 1,
            limit_price: None,
            stop_price: Some(stop_price),
            fill_volume: 0,
            filled_price: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn day_window() -> SessionWindow {
        SessionWindow {
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }
}
