//! Session-window enforcement: a position opened outside the trading window
//! is closed, working orders are cancelled, and the account is locked until
//! the next session start.

mod common;

use chrono::Timelike;
use common::{ACCOUNT, Harness, MNQ, position};
use riskguard::domain::events::RiskEvent;
use riskguard::domain::session::SessionWindow;
use riskguard::domain::types::PositionSide;
use riskguard::infrastructure::mock::GatewayCall;
use rust_decimal_macros::dec;

/// A window that opens two hours from now (account timezone), so "now" is
/// always outside it.
fn closed_window_rules() -> (String, SessionWindow) {
    let local = chrono::Utc::now().with_timezone(&chrono_tz::America::New_York);
    let open = (local + chrono::Duration::hours(2))
        .time()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap();
    let close = (local + chrono::Duration::hours(3))
        .time()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap();
    let yaml = format!(
        r#"
timezone: America/New_York
rules:
  - rule: session_block_outside
    session_start: "{}"
    session_end: "{}"
"#,
        open.format("%H:%M"),
        close.format("%H:%M"),
    );
    (yaml, SessionWindow { open, close })
}

#[tokio::test]
async fn position_outside_window_is_closed_and_locked_until_open() {
    let (rules, window) = closed_window_rules();
    let harness = Harness::with_rules(&rules).await;
    harness
        .gateway
        .set_open_positions(ACCOUNT, vec![position(MNQ, PositionSide::Long, 1, dec!(21000))]);

    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 1, dec!(21000))))
        .await;
    harness.settle().await;

    let closes = harness
        .gateway
        .calls_of_kind(|c| matches!(c, GatewayCall::ClosePosition(_, contract) if contract == MNQ));
    assert_eq!(closes.len(), 1);
    // Cancel-all swept the (empty) order book too.
    assert!(
        !harness
            .gateway
            .calls_of_kind(|c| matches!(c, GatewayCall::SearchOpenOrders(_)))
            .is_empty()
    );

    let now = chrono::Utc::now();
    assert!(harness.lockouts.is_locked(ACCOUNT, now).await.unwrap());
    let lockout = harness.lockouts.info(ACCOUNT).await.unwrap();
    let expected = harness
        .clock
        .next_session_open(&window, now, &Default::default());
    assert_eq!(lockout.expires_at, expected);
}

#[tokio::test]
async fn in_window_position_is_left_alone() {
    // A window that brackets "now".
    let local = chrono::Utc::now().with_timezone(&chrono_tz::America::New_York);
    let open = (local - chrono::Duration::hours(2)).time().with_second(0).unwrap().with_nanosecond(0).unwrap();
    let close = (local + chrono::Duration::hours(2)).time().with_second(0).unwrap().with_nanosecond(0).unwrap();
    let yaml = format!(
        r#"
timezone: America/New_York
rules:
  - rule: session_block_outside
    session_start: "{}"
    session_end: "{}"
"#,
        open.format("%H:%M"),
        close.format("%H:%M"),
    );
    let harness = Harness::with_rules(&yaml).await;

    harness
        .send(RiskEvent::Position(position(MNQ, PositionSide::Long, 1, dec!(21000))))
        .await;
    harness.settle().await;

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
