//! Wire shapes pushed by the gateway hubs and returned by its REST surface.
//!
//! Unknown fields are ignored; a payload missing a required field fails to
//! deserialize and is dropped by the caller with a counter. Conversions into
//! domain types reject enum values outside the documented sets.

use crate::domain::types::{
    AccountFlags, Order, OrderSide, OrderStatus, OrderType, Position, PositionSide, Quote,
    Trade,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayUserAccount {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub balance: Decimal,
    pub can_trade: bool,
    #[serde(default)]
    pub is_visible: bool,
    #[serde(default)]
    pub simulated: bool,
}

impl From<GatewayUserAccount> for AccountFlags {
    fn from(wire: GatewayUserAccount) -> Self {
        AccountFlags {
            account_id: wire.id,
            name: wire.name,
            balance: wire.balance,
            can_trade: wire.can_trade,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayUserPosition {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub position_type: i32,
    pub size: u32,
    pub average_price: Decimal,
}

impl TryFrom<GatewayUserPosition> for Position {
    type Error = &'static str;

    fn try_from(wire: GatewayUserPosition) -> Result<Self, Self::Error> {
        // Size 0 means flat; the side value is meaningless then, so accept
        // anything and normalize to long.
        let side = match PositionSide::from_wire(wire.position_type) {
            Some(side) => side,
            None if wire.size == 0 => PositionSide::Long,
            None => return Err("type outside {1, 2}"),
        };
        Ok(Position {
            account_id: wire.account_id,
            contract_id: wire.contract_id,
            side,
            size: wire.size,
            average_price: wire.average_price,
            opened_at: wire.creation_timestamp,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayUserOrder {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    #[serde(default)]
    pub symbol_id: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub update_timestamp: Option<DateTime<Utc>>,
    pub status: i32,
    #[serde(rename = "type")]
    pub order_type: i32,
    pub side: i32,
    pub size: u32,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub fill_volume: u32,
    #[serde(default)]
    pub filled_price: Option<Decimal>,
    #[serde(default)]
    pub custom_tag: Option<String>,
}

impl TryFrom<GatewayUserOrder> for Order {
    type Error = &'static str;

    fn try_from(wire: GatewayUserOrder) -> Result<Self, Self::Error> {
        Ok(Order {
            order_id: wire.id,
            account_id: wire.account_id,
            contract_id: wire.contract_id,
            side: OrderSide::from_wire(wire.side).ok_or("side outside {0, 1}")?,
            order_type: OrderType::from_wire(wire.order_type).ok_or("unknown order type")?,
            status: OrderStatus::from_wire(wire.status).ok_or("unknown order status")?,
            size: wire.size,
            limit_price: wire.limit_price,
            stop_price: wire.stop_price,
            fill_volume: wire.fill_volume,
            filled_price: wire.filled_price,
            created_at: wire.creation_timestamp,
            updated_at: wire.update_timestamp.unwrap_or(wire.creation_timestamp),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayUserTrade {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    pub creation_timestamp: DateTime<Utc>,
    pub price: Decimal,
    #[serde(default)]
    pub profit_and_loss: Option<Decimal>,
    #[serde(default)]
    pub fees: Decimal,
    pub side: i32,
    pub size: u32,
    #[serde(default)]
    pub voided: bool,
    pub order_id: i64,
}

impl TryFrom<GatewayUserTrade> for Trade {
    type Error = &'static str;

    fn try_from(wire: GatewayUserTrade) -> Result<Self, Self::Error> {
        Ok(Trade {
            trade_id: wire.id,
            account_id: wire.account_id,
            contract_id: wire.contract_id,
            price: wire.price,
            pnl: wire.profit_and_loss,
            fees: wire.fees,
            side: OrderSide::from_wire(wire.side).ok_or("side outside {0, 1}")?,
            size: wire.size,
            voided: wire.voided,
            order_id: wire.order_id,
            executed_at: wire.creation_timestamp,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayQuote {
    /// The contract id the quote subscription was made with.
    pub symbol: String,
    #[serde(default)]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub best_bid: Option<Decimal>,
    #[serde(default)]
    pub best_ask: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl GatewayQuote {
    /// Quotes without a last trade price cannot mark positions; they are
    /// dropped rather than cached as zero.
    pub fn into_quote(self, ingested_at: DateTime<Utc>) -> Result<Quote, &'static str> {
        let last = self.last_price.ok_or("lastPrice missing")?;
        Ok(Quote {
            contract_id: self.symbol,
            last,
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            source_timestamp: self.timestamp.or(self.last_updated).unwrap_or(ingested_at),
            ingested_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn position_payload_parses() {
        let raw = r#"{
            "id": 55,
            "accountId": 101,
            "contractId": "CON.F.US.MNQ.U25",
            "creationTimestamp": "2025-07-14T18:00:00Z",
            "type": 1,
            "size": 2,
            "averagePrice": 21000.25,
            "someFutureField": true
        }"#;
        let wire: GatewayUserPosition = serde_json::from_str(raw).unwrap();
        let position = Position::try_from(wire).unwrap();
        assert_eq!(position.account_id, 101);
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(position.average_price, dec!(21000.25));
    }

    #[test]
    fn position_with_bad_side_is_rejected() {
        let raw = r#"{
            "id": 55,
            "accountId": 101,
            "contractId": "CON.F.US.MNQ.U25",
            "creationTimestamp": "2025-07-14T18:00:00Z",
            "type": 9,
            "size": 2,
            "averagePrice": 21000.25
        }"#;
        let wire: GatewayUserPosition = serde_json::from_str(raw).unwrap();
        assert!(Position::try_from(wire).is_err());
    }

    #[test]
    fn flat_position_tolerates_odd_side() {
        let raw = r#"{
            "id": 55,
            "accountId": 101,
            "contractId": "CON.F.US.MNQ.U25",
            "creationTimestamp": "2025-07-14T18:00:00Z",
            "type": 0,
            "size": 0,
            "averagePrice": 0
        }"#;
        let wire: GatewayUserPosition = serde_json::from_str(raw).unwrap();
        let position = Position::try_from(wire).unwrap();
        assert!(position.is_flat());
    }

    #[test]
    fn trade_with_null_pnl_is_half_turn() {
        let raw = r#"{
            "id": 9,
            "accountId": 101,
            "contractId": "CON.F.US.MNQ.U25",
            "creationTimestamp": "2025-07-14T18:00:00Z",
            "price": 21000.0,
            "profitAndLoss": null,
            "fees": 0.74,
            "side": 0,
            "size": 1,
            "voided": false,
            "orderId": 4
        }"#;
        let wire: GatewayUserTrade = serde_json::from_str(raw).unwrap();
        let trade = Trade::try_from(wire).unwrap();
        assert_eq!(trade.pnl, None);
        assert_eq!(trade.side, OrderSide::Bid);
    }

    #[test]
    fn order_missing_required_field_fails_to_parse() {
        // No accountId.
        let raw = r#"{
            "id": 9,
            "contractId": "CON.F.US.MNQ.U25",
            "creationTimestamp": "2025-07-14T18:00:00Z",
            "status": 1,
            "type": 4,
            "side": 1,
            "size": 1
        }"#;
        assert!(serde_json::from_str::<GatewayUserOrder>(raw).is_err());
    }

    #[test]
    fn quote_without_last_price_is_dropped() {
        let raw = r#"{"symbol": "CON.F.US.MNQ.U25", "bestBid": 20999.75}"#;
        let wire: GatewayQuote = serde_json::from_str(raw).unwrap();
        assert!(wire.into_quote(Utc::now()).is_err());
    }
}
