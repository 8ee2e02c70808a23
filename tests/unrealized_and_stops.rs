//! Mark-to-last rules: the unrealized loss floor and automated stop
//! management off quote ticks.

mod common;

use common::{ACCOUNT, Harness, MNQ, position, quote, stop_order};
use riskguard::domain::events::RiskEvent;
use riskguard::domain::types::{OrderSide, PositionSide};
use riskguard::infrastructure::mock::GatewayCall;
use rust_decimal_macros::dec;

#[tokio::test]
async fn unrealized_drawdown_flattens_and_locks() {
    let harness = Harness::with_rules(
        r#"
rules:
  - rule: daily_unrealized_loss
    limit: -400
"#,
    )
    .await;
    harness
        .gateway
        .set_open_positions(ACCOUNT, vec![position(MNQ, PositionSide::Long, 2, dec!(21000))]);

    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 2, dec!(21000))))
        .await;
    harness.settle().await;
    // Quote routes to the account because it holds the contract.
    harness.send(RiskEvent::Quote(quote(MNQ, dec!(20900)))).await;
    harness
        .send(RiskEvent::UnrealizedTick { account_id: ACCOUNT })
        .await;
    harness.settle().await;

    // (20900-21000)/0.25 ticks * $0.5 * 2 = -$400, at the limit.
    assert!(
        !harness
            .gateway
            .calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(..)))
            .is_empty()
    );
    assert!(
        harness
            .lockouts
            .is_locked(ACCOUNT, chrono::Utc::now())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn missing_quote_defers_the_unrealized_check() {
    let harness = Harness::with_rules(
        r#"
rules:
  - rule: daily_unrealized_loss
    limit: -1
"#,
    )
    .await;
    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 2, dec!(21000))))
        .await;
    harness
        .send(RiskEvent::UnrealizedTick { account_id: ACCOUNT })
        .await;
    harness.settle().await;

    // No quote for the held contract: the rule defers instead of guessing.
    assert!(
        !harness
            .lockouts
            .is_locked(ACCOUNT, chrono::Utc::now())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn breakeven_stop_move_on_quote_tick() {
    let harness = Harness::with_rules(
        r#"
rules:
  - rule: trade_management
    breakeven_trigger_ticks: 20
    trailing_activation_ticks: 60
    trailing_distance_ticks: 40
"#,
    )
    .await;

    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 1, dec!(21000))))
        .await;
    harness
        .send(RiskEvent::Order(stop_order(44, MNQ, OrderSide::Ask, dec!(20990))))
        .await;
    harness.settle().await;
    // +5 points = 20 ticks of profit: stop moves to entry.
    harness.send(RiskEvent::Quote(quote(MNQ, dec!(21005)))).await;
    harness.settle().await;

    let modifies = harness
        .gateway
        .calls_of_kind(|c| matches!(c, GatewayCall::ModifyOrder(..)));
    assert_eq!(
        modifies,
        vec![GatewayCall::ModifyOrder(ACCOUNT, 44, Some(dec!(21000)))]
    );
    // Never a close, never a lockout.
    assert!(
        harness
            .gateway
            .calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(..)))
            .is_empty()
    );
    assert!(
        !harness
            .lockouts
            .is_locked(ACCOUNT, chrono::Utc::now())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn stop_never_moves_backwards() {
    let harness = Harness::with_rules(
        r#"
rules:
  - rule: trade_management
    breakeven_trigger_ticks: 20
    trailing_activation_ticks: 60
    trailing_distance_ticks: 40
"#,
    )
    .await;

    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 1, dec!(21000))))
        .await;
    // Stop already tighter than breakeven.
    harness
        .send(RiskEvent::Order(stop_order(44, MNQ, OrderSide::Ask, dec!(21002))))
        .await;
    harness.settle().await;
    harness.send(RiskEvent::Quote(quote(MNQ, dec!(21005)))).await;
    harness.settle().await;

    assert!(
        harness
            .gateway
            .calls_of_kind(|c| matches!(c, GatewayCall::ModifyOrder(..)))
            .is_empty()
    );
}
