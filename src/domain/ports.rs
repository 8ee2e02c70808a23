//! Ports to the brokerage gateway. Infrastructure provides the REST-backed
//! implementations; tests provide mocks.

use crate::domain::errors::GatewayError;
use crate::domain::risk::rule::OrderChanges;
use crate::domain::types::{AccountId, ContractId, ContractSpec, Order, OrderId, Position};
use async_trait::async_trait;

/// The REST trading surface the enforcement executor drives.
#[async_trait]
pub trait TradingGateway: Send + Sync {
    async fn close_position(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
    ) -> Result<(), GatewayError>;

    async fn partial_close(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
        size: u32,
    ) -> Result<(), GatewayError>;

    async fn cancel_order(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<(), GatewayError>;

    async fn modify_order(
        &self,
        account_id: AccountId,
        order_id: OrderId,
        changes: &OrderChanges,
    ) -> Result<(), GatewayError>;

    async fn search_open_positions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Position>, GatewayError>;

    async fn search_open_orders(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Order>, GatewayError>;

    async fn search_contract(&self, text: &str) -> Result<Vec<ContractSpec>, GatewayError>;

    /// Forces a credential refresh; called once by the executor when a
    /// request comes back 401.
    async fn refresh_session(&self) -> Result<(), GatewayError>;
}
