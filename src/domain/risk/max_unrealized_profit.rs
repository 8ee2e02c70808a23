use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RemediationIntent, RiskRule, RuleContext, attributed_reason,
};

#[derive(Debug, Clone)]
pub struct MaxUnrealizedProfitConfig {
    /// Breach when marked-to-last open P&L reaches this (positive) value.
    pub limit: Decimal,
}

/// The profit-taking mirror of the unrealized-loss rule: bank the day once
/// open profit reaches the ceiling.
#[derive(Debug)]
pub struct MaxUnrealizedProfit {
    config: MaxUnrealizedProfitConfig,
}

impl MaxUnrealizedProfit {
    pub fn new(config: MaxUnrealizedProfitConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for MaxUnrealizedProfit {
    fn id(&self) -> &'static str {
        "max_unrealized_profit"
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
                "unrealized mark partial, deferring profit check"
            );
            return None;
        }
        if mark.total < self.config.limit {
            return None;
        }

        let until = ctx.clock.next_rollover(ctx.now, ctx.holidays);
        let detail = format!(
            "unrealized {} reached target {}",
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
