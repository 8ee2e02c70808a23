use crate::domain::errors::GatewayError;
use crate::domain::ports::TradingGateway;
use crate::domain::risk::rule::OrderChanges;
use crate::domain::types::{
    AccountId, ContractId, ContractSpec, Order, OrderId, Position,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::gateway::auth::TokenManager;
use crate::infrastructure::gateway::wire::{GatewayUserOrder, GatewayUserPosition};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Every REST response carries this envelope alongside its payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    success: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionsPayload {
    #[serde(default)]
    positions: Vec<GatewayUserPosition>,
}

#[derive(Debug, Deserialize)]
struct OrdersPayload {
    #[serde(default)]
    orders: Vec<GatewayUserOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractsPayload {
    #[serde(default)]
    contracts: Vec<WireContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContract {
    id: String,
    #[serde(default)]
    name: Option<String>,
    tick_size: Decimal,
    tick_value: Decimal,
    #[serde(default)]
    active_contract: bool,
}

/// The REST trading client: thin typed calls with the shared envelope
/// decoded into [`GatewayError`]s. Status-code policy lives in the
/// enforcement executor.
pub struct RestGateway {
    client: ClientWithMiddleware,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl RestGateway {
    pub fn new(base_url: String, tokens: Arc<TokenManager>) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
            tokens,
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let token = self.tokens.get().await?;
        let url = format!("{}{}", self.base_url, path);
        debug!(path, "gateway request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Malformed(format!("{}: {}", e, text)))?;
        if !envelope.success {
            return Err(GatewayError::Refused {
                code: envelope.error_code.unwrap_or(-1),
                message: envelope
                    .error_message
                    .unwrap_or_else(|| "gateway refused request".to_string()),
            });
        }
        serde_json::from_str(&text).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TradingGateway for RestGateway {
    async fn close_position(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
    ) -> Result<(), GatewayError> {
        self.post::<Envelope>(
            "/api/Position/closeContract",
            json!({"accountId": account_id, "contractId": contract_id}),
        )
        .await
        .map(|_| ())
    }

    async fn partial_close(
        &self,
        account_id: AccountId,
        contract_id: &ContractId,
        size: u32,
    ) -> Result<(), GatewayError> {
        self.post::<Envelope>(
            "/api/Position/partialCloseContract",
            json!({"accountId": account_id, "contractId": contract_id, "size": size}),
        )
        .await
        .map(|_| ())
    }

    async fn cancel_order(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<(), GatewayError> {
        self.post::<Envelope>(
            "/api/Order/cancel",
            json!({"accountId": account_id, "orderId": order_id}),
        )
        .await
        .map(|_| ())
    }

    async fn modify_order(
        &self,
        account_id: AccountId,
        order_id: OrderId,
        changes: &OrderChanges,
    ) -> Result<(), GatewayError> {
        let mut body = serde_json::Map::new();
        body.insert("accountId".to_string(), json!(account_id));
        body.insert("orderId".to_string(), json!(order_id));
        if let Some(size) = changes.size {
            body.insert("size".to_string(), json!(size));
        }
        if let Some(limit) = changes.limit_price {
            body.insert("limitPrice".to_string(), json!(limit));
        }
        if let Some(stop) = changes.stop_price {
            body.insert("stopPrice".to_string(), json!(stop));
        }
        if let Some(trail) = changes.trail_price {
            body.insert("trailPrice".to_string(), json!(trail));
        }
        self.post::<Envelope>("/api/Order/modify", serde_json::Value::Object(body))
            .await
            .map(|_| ())
    }

    async fn search_open_positions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Position>, GatewayError> {
        let payload: PositionsPayload = self
            .post("/api/Position/searchOpen", json!({"accountId": account_id}))
            .await?;
        Ok(payload
            .positions
            .into_iter()
            .filter_map(|wire| match Position::try_from(wire) {
                Ok(position) => Some(position),
                Err(reason) => {
                    warn!(account_id, reason, "dropping malformed position from searchOpen");
                    None
                }
            })
            .collect())
    }

    async fn search_open_orders(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Order>, GatewayError> {
        let payload: OrdersPayload = self
            .post("/api/Order/searchOpen", json!({"accountId": account_id}))
            .await?;
        Ok(payload
            .orders
            .into_iter()
            .filter_map(|wire| match Order::try_from(wire) {
                Ok(order) => Some(order),
                Err(reason) => {
                    warn!(account_id, reason, "dropping malformed order from searchOpen");
                    None
                }
            })
            .collect())
    }

    async fn search_contract(&self, text: &str) -> Result<Vec<ContractSpec>, GatewayError> {
        let payload: ContractsPayload = self
            .post(
                "/api/Contract/search",
                json!({"searchText": text, "live": true}),
            )
            .await?;
        Ok(payload
            .contracts
            .into_iter()
            .map(|wire| ContractSpec {
                symbol: wire
                    .name
                    .unwrap_or_else(|| {
                        crate::domain::types::symbol_of_contract(&wire.id).to_string()
                    }),
                contract_id: wire.id,
                tick_size: wire.tick_size,
                tick_value: wire.tick_value,
                active: wire.active_contract,
            })
            .collect())
    }

    async fn refresh_session(&self) -> Result<(), GatewayError> {
        self.tokens.refresh().await.map(|_| ())
    }
}
