//! Gateway trading-permission guard: `canTrade=false` flattens and locks
//! indefinitely; `canTrade=true` lifts only that lockout.

mod common;

use common::{ACCOUNT, Harness, MNQ, position};
use riskguard::domain::events::RiskEvent;
use riskguard::domain::types::{AccountFlags, PositionSide};
use riskguard::infrastructure::mock::GatewayCall;
use rust_decimal_macros::dec;

const RULES: &str = r#"
rules:
  - rule: auth_loss_guard
  - rule: symbol_blocks
    blocked_symbols: [RTY]
"#;

fn flags(can_trade: bool) -> RiskEvent {
    RiskEvent::AccountFlags(AccountFlags {
        account_id: ACCOUNT,
        name: "EVAL-101".to_string(),
        balance: dec!(50000),
        can_trade,
    })
}

#[tokio::test]
async fn trading_revoked_flattens_and_locks_indefinitely() {
    let harness = Harness::with_rules(RULES).await;
    harness
        .gateway
        .set_open_positions(ACCOUNT, vec![position(MNQ, PositionSide::Long, 1, dec!(21000))]);

    harness.send(flags(false)).await;
    harness.settle().await;

    assert!(
        !harness
            .gateway
            .calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(..)))
            .is_empty()
    );
    let far_future = chrono::Utc::now() + chrono::Duration::days(3650);
    assert!(harness.lockouts.is_locked(ACCOUNT, far_future).await.unwrap());
}

#[tokio::test]
async fn trading_restored_lifts_only_the_auth_lockout() {
    let harness = Harness::with_rules(RULES).await;

    harness.send(flags(false)).await;
    harness.settle().await;
    assert!(
        harness
            .lockouts
            .is_locked(ACCOUNT, chrono::Utc::now())
            .await
            .unwrap()
    );

    // A symbol lockout attributed to another rule is in force too.
    harness
        .lockouts
        .set_symbol(
            ACCOUNT,
            "RTY".to_string(),
            riskguard::domain::risk::rule::attributed_reason("symbol_blocks", "symbol RTY is blocked"),
            riskguard::domain::types::Lockout::never(),
        )
        .await
        .unwrap();

    // The flags event reaches the rules even while the account is locked;
    // anything else would leave the auth lockout unliftable.
    harness.send(flags(true)).await;
    harness.settle().await;

    let now = chrono::Utc::now();
    assert!(!harness.lockouts.is_locked(ACCOUNT, now).await.unwrap());
    assert!(
        harness
            .lockouts
            .is_symbol_locked(ACCOUNT, "RTY", now)
            .await
            .unwrap()
    );
}
