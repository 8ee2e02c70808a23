//! Stop-loss grace: an unprotected position is closed when the grace timer
//! fires; a protective stop or an early close disarms it.

mod common;

use common::{ACCOUNT, Harness, MNQ, position, stop_order};
use riskguard::domain::events::RiskEvent;
use riskguard::domain::types::{OrderSide, PositionSide};
use riskguard::infrastructure::mock::GatewayCall;
use rust_decimal_macros::dec;
use std::time::Duration;

const RULES: &str = r#"
rules:
  - rule: no_stop_loss_grace
    grace_period_seconds: 10
"#;

#[tokio::test(start_paused = true)]
async fn unprotected_position_closed_after_grace() {
    let harness = Harness::with_rules(RULES).await;
    harness
        .gateway
        .set_open_positions(ACCOUNT, vec![position(MNQ, PositionSide::Long, 1, dec!(21000))]);

    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 1, dec!(21000))))
        .await;
    harness.settle().await;
    // Nothing happens inside the grace window.
    assert!(harness.gateway.calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(..))).is_empty());

    tokio::time::advance(Duration::from_secs(11)).await;
    harness.settle().await;

    let closes = harness
        .gateway
        .calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(_, contract) if contract == MNQ));
    assert_eq!(closes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn protective_stop_disarms_the_grace_close() {
    let harness = Harness::with_rules(RULES).await;
    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 1, dec!(21000))))
        .await;
    // A sell stop arrives within the window.
    harness
        .send(RiskEvent::Order(stop_order(44, MNQ, OrderSide::Ask, dec!(20950))))
        .await;
    harness.settle().await;

    tokio::time::advance(Duration::from_secs(15)).await;
    harness.settle().await;

    assert!(
        harness
            .gateway
            .calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(..)))
            .is_empty()
    );
}

#[tokio::test(start_paused = true)]
async fn closing_before_expiry_cancels_the_timer() {
    let harness = Harness::with_rules(RULES).await;
    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 1, dec!(21000))))
        .await;
    harness.settle().await;
    // Trader flattens on their own inside the window.
    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 0, dec!(21000))))
        .await;
    harness.settle().await;

    tokio::time::advance(Duration::from_secs(15)).await;
    harness.settle().await;

    assert!(
        harness
            .gateway
            .calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(..)))
            .is_empty()
    );
}
