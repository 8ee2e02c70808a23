//! Scriptable gateway double for integration tests.

use crate::domain::errors::GatewayError;
use crate::domain::ports::TradingGateway;
use crate::domain::risk::rule::OrderChanges;
use crate::domain::types::{
    AccountId, ContractId, ContractSpec, Order, OrderId, Position, symbol_of_contract,
};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;

/// A gateway call observed by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    ClosePosition(AccountId, ContractId),
    PartialClose(AccountId, ContractId, u32),
    CancelOrder(AccountId, OrderId),
    ModifyOrder(AccountId, OrderId, Option<rust_decimal::Decimal>),
    SearchOpenPositions(AccountId),
    SearchOpenOrders(AccountId),
    SearchContract(String),
    RefreshSession,
}

/// Records every call and serves scripted `searchOpen` responses. Contract
/// search answers with MNQ-style metadata unless a spec was scripted.
#[derive(Default)]
pub struct MockGateway {
    pub calls: Mutex<Vec<GatewayCall>>,
    pub open_positions: Mutex<HashMap<AccountId, Vec<Position>>>,
    pub open_orders: Mutex<HashMap<AccountId, Vec<Order>>>,
    pub specs: Mutex<HashMap<ContractId, ContractSpec>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_open_positions(&self, account_id: AccountId, positions: Vec<Position>) {
        self.open_positions
            .lock()
            .unwrap()
            .insert(account_id, positions);
    }

    pub fn set_open_orders(&self, account_id: AccountId, orders: Vec<Order>) {
        self.open_orders.lock().unwrap().insert(account_id, orders);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of_kind(&self, filter: impl Fn(&GatewayCall) -> bool) -> Vec<GatewayCall> {
        self.calls().into_iter().filter(|c| filter(c)).collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TradingGateway for MockGateway {
    async fn close_position(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::ClosePosition(account_id, contract_id.clone()));
        // The close takes effect on the gateway side immediately.
        if let Some(positions) = self.open_positions.lock().unwrap().get_mut(&account_id) {
            positions.retain(|p| &p.contract_id != contract_id);
        }
        Ok(())
    }

    async fn partial_close(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
        size: u32,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::PartialClose(
            account_id,
            contract_id.clone(),
            size,
        ));
        if let Some(positions) = self.open_positions.lock().unwrap().get_mut(&account_id) {
            for position in positions.iter_mut() {
                if &position.contract_id == contract_id {
                    position.size = position.size.saturating_sub(size);
                }
            }
            positions.retain(|p| p.size > 0);
        }
        Ok(())
    }

    async fn cancel_order(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::CancelOrder(account_id, order_id));
        if let Some(orders) = self.open_orders.lock().unwrap().get_mut(&account_id) {
            orders.retain(|o| o.order_id != order_id);
        }
        Ok(())
    }

    async fn modify_order(
        &self,
        account_id: AccountId,
        order_id: OrderId,
        changes: &OrderChanges,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::ModifyOrder(
            account_id,
            order_id,
            changes.stop_price,
        ));
        Ok(())
    }

    async fn search_open_positions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Position>, GatewayError> {
        self.record(GatewayCall::SearchOpenPositions(account_id));
        Ok(self
            .open_positions
            .lock()
            .unwrap()
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_open_orders(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Order>, GatewayError> {
        self.record(GatewayCall::SearchOpenOrders(account_id));
        Ok(self
            .open_orders
            .lock()
            .unwrap()
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_contract(&self, text: &str) -> Result<Vec<ContractSpec>, GatewayError> {
        self.record(GatewayCall::SearchContract(text.to_string()));
        if let Some(spec) = self.specs.lock().unwrap().get(text) {
            return Ok(vec![spec.clone()]);
        }
        // Micro-future-like defaults keep tests terse.
        Ok(vec![ContractSpec {
            contract_id: text.to_string(),
            symbol: symbol_of_contract(text).to_string(),
            tick_size: dec!(0.25),
            tick_value: dec!(0.5),
            active: true,
        }])
    }

    async fn refresh_session(&self) -> Result<(), GatewayError> {
        self.record(GatewayCall::RefreshSession);
        Ok(())
    }
}
