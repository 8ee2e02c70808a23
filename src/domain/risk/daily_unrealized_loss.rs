use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RemediationIntent, RiskRule, RuleContext, attributed_reason,
};

#[derive(Debug, Clone)]
pub struct DailyUnrealizedLossConfig {
    /// Breach when marked-to-last open P&L reaches this (negative) value.
    pub limit: Decimal,
}

/// Evaluates unrealized P&L on position events and the periodic mark tick.
///
/// Defers whenever any open position lacks a fresh quote; a decision this
/// drastic is only made on a complete mark.
#[derive(Debug)]
pub struct DailyUnrealizedLoss {
    config: DailyUnrealizedLossConfig,
}

impl DailyUnrealizedLoss {
    pub fn new(config: DailyUnrealizedLossConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for DailyUnrealizedLoss {
    fn id(&self) -> &'static str {
        "daily_unrealized_loss"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Position, EventKind::UnrealizedTick]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        if !matches!(
            event,
            RiskEvent::Position(_) | RiskEvent::UnrealizedTick { .. }
        ) {
            return None;
        }
        if ctx.positions.is_empty() {
            return None;
        }

        let mark = ctx.unrealized();
        if mark.partial {
            debug!(
                account_id = ctx.account_id,
                "unrealized mark partial, deferring loss check"
            );
            return None;
        }
        if mark.total > self.config.limit {
            return None;
        }

        let until = ctx.clock.next_rollover(ctx.now, ctx.holidays);
        let detail = format!(
            "unrealized {} reached limit {}",
            mark.total, self.config.limit
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
    use crate::domain::risk::testkit::{CtxFixture, ES, MNQ};
    use crate::domain::types::PositionSide;
    use rust_decimal_macros::dec;

    fn rule(limit: Decimal) -> DailyUnrealizedLoss {
        DailyUnrealizedLoss::new(DailyUnrealizedLossConfig { limit })
    }

    #[test]
    fn breach_on_deep_drawdown() {
        // Long 2 MNQ @21000, last 20900: -400 ticks * $0.5 * 2 = -$400.
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 2, dec!(21000))
            .with_quote(MNQ, dec!(20900))
            .with_spec(MNQ, dec!(0.25), dec!(0.5));
        let event = RiskEvent::UnrealizedTick { account_id: 1 };
        let breach = rule(dec!(-400)).evaluate(&event, &fixture.ctx()).unwrap();
        assert_eq!(breach.remediations.len(), 2);
        assert!(breach.lockout.is_some());
    }

    #[test]
    fn quiet_above_limit() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 1, dec!(21000))
            .with_quote(MNQ, dec!(20990))
            .with_spec(MNQ, dec!(0.25), dec!(0.5));
        let event = RiskEvent::UnrealizedTick { account_id: 1 };
        // -40 ticks * $0.5 = -$20, limit -500: quiet.
        assert!(rule(dec!(-500)).evaluate(&event, &fixture.ctx()).is_none());
    }

    #[test]
    fn partial_mark_defers() {
        // Two positions, only one quoted: no decision even though the quoted
        // leg alone is past the limit.
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 2, dec!(21000))
            .with_position(ES, PositionSide::Long, 1, dec!(5800))
            .with_quote(MNQ, dec!(20000))
            .with_spec(MNQ, dec!(0.25), dec!(0.5))
            .with_spec(ES, dec!(0.25), dec!(12.5));
        let event = RiskEvent::UnrealizedTick { account_id: 1 };
        assert!(rule(dec!(-400)).evaluate(&event, &fixture.ctx()).is_none());
    }

    #[test]
    fn flat_account_is_quiet() {
        let fixture = CtxFixture::new(1);
        let event = RiskEvent::UnrealizedTick { account_id: 1 };
        assert!(rule(dec!(-1)).evaluate(&event, &fixture.ctx()).is_none());
    }
}
