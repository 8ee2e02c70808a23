use rust_decimal::Decimal;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RemediationIntent, RiskRule, RuleContext, attributed_reason,
};

#[derive(Debug, Clone)]
pub struct DailyRealizedLossConfig {
    /// Breach when realized session P&L reaches this (negative) value.
    pub limit: Decimal,
}

/// Flattens the account and locks it out until rollover once the session's
/// realized loss reaches the configured floor.
#[derive(Debug)]
pub struct DailyRealizedLoss {
    config: DailyRealizedLossConfig,
}

impl DailyRealizedLoss {
    pub fn new(config: DailyRealizedLossConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for DailyRealizedLoss {
    fn id(&self) -> &'static str {
        "daily_realized_loss"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Trade]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::Trade(trade) = event else {
            return None;
        };
        // Half-turn trades carry no P&L and cannot move the realized total.
        trade.pnl?;

        if ctx.realized_pnl > self.config.limit {
            return None;
        }

        let until = ctx.clock.next_rollover(ctx.now, ctx.holidays);
        let detail = format!(
            "realized {} reached limit {}",
            ctx.realized_pnl, self.config.limit
        );
        Some(Breach {
            rule: self.id(),
            reason: detail.clone(),
            remediations: vec![
                RemediationIntent::CloseAll {
                    account_id: ctx.account_id,
                },
                RemediationIntent::CancelAll {
                    account_id: ctx.account_id,
                },
            ],
            lockout: Some(LockoutIntent::Hard {
                reason: attributed_reason(self.id(), &detail),
                until,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::testkit::{CtxFixture, MNQ};
    use crate::domain::types::{OrderSide, Trade};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn trade_with_pnl(pnl: Option<Decimal>) -> RiskEvent {
        RiskEvent::Trade(Trade {
            trade_id: 10,
            account_id: 1,
            contract_id: MNQ.to_string(),
            price: dec!(21000),
            pnl,
            fees: dec!(0.74),
            side: OrderSide::Ask,
            size: 1,
            voided: false,
            order_id: 5,
            executed_at: Utc::now(),
        })
    }

    #[test]
    fn above_limit_is_quiet() {
        // +100 -300 -250 = -450 against a -500 limit: no breach.
        let mut fixture = CtxFixture::new(1);
        fixture.realized = dec!(-450);
        let rule = DailyRealizedLoss::new(DailyRealizedLossConfig { limit: dec!(-500) });
        assert!(rule.evaluate(&trade_with_pnl(Some(dec!(-250))), &fixture.ctx()).is_none());
    }

    #[test]
    fn breach_flattens_and_locks_until_rollover() {
        // +100 -300 -350 = -550 <= -500.
        let mut fixture = CtxFixture::new(1);
        fixture.realized = dec!(-550);
        let rule = DailyRealizedLoss::new(DailyRealizedLossConfig { limit: dec!(-500) });
        let breach = rule
            .evaluate(&trade_with_pnl(Some(dec!(-350))), &fixture.ctx())
            .unwrap();

        assert_eq!(breach.remediations.len(), 2);
        assert!(matches!(
            breach.remediations[0],
            RemediationIntent::CloseAll { account_id: 1 }
        ));
        assert!(matches!(
            breach.remediations[1],
            RemediationIntent::CancelAll { account_id: 1 }
        ));

        // Lockout expires at today's 17:00 ET rollover (21:00 UTC in July).
        let expected = Utc.with_ymd_and_hms(2025, 7, 14, 21, 0, 0).single().unwrap();
        match breach.lockout {
            Some(LockoutIntent::Hard { until, .. }) => assert_eq!(until, expected),
            other => panic!("expected hard lockout, got {:?}", other),
        }
    }

    #[test]
    fn half_turn_trades_are_ignored() {
        let mut fixture = CtxFixture::new(1);
        fixture.realized = dec!(-9999);
        let rule = DailyRealizedLoss::new(DailyRealizedLossConfig { limit: dec!(-500) });
        assert!(rule.evaluate(&trade_with_pnl(None), &fixture.ctx()).is_none());
    }
}
