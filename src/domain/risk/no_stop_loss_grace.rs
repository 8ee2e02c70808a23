use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{Breach, RemediationIntent, RiskRule, RuleContext};
use crate::domain::types::OrderSide;

#[derive(Debug, Clone, Copy)]
pub struct StopLossGraceConfig {
    /// How long a fresh position may live without a protective stop.
    pub grace_period: std::time::Duration,
}

/// Closes positions that are still unprotected when their grace timer fires.
///
/// The dispatcher starts a named timer on every flat → non-zero transition
/// (using [`RiskRule::grace_period`]) and cancels it if the position closes
/// first; this rule only judges the resulting `GraceExpired` event. A
/// stop-kind order on the protecting side satisfies the check.
#[derive(Debug)]
pub struct NoStopLossGrace {
    config: StopLossGraceConfig,
}

impl NoStopLossGrace {
    pub fn new(config: StopLossGraceConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for NoStopLossGrace {
    fn id(&self) -> &'static str {
        "no_stop_loss_grace"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::GraceExpired]
    }

    fn grace_period(&self) -> Option<std::time::Duration> {
        Some(self.config.grace_period)
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::GraceExpired { contract_id, .. } = event else {
            return None;
        };

        // Position may have closed between timer fire and evaluation.
        let position = ctx
            .positions
            .iter()
            .find(|p| &p.contract_id == contract_id && p.size > 0)?;

        let protecting = OrderSide::protecting(position.side);
        if ctx.latest_stop_order(contract_id, protecting).is_some() {
            return None;
        }

        Some(Breach {
            rule: self.id(),
            reason: format!(
                "{} position in {} has no protective stop after {}s grace",
                position.side,
                position.symbol(),
                self.config.grace_period.as_secs()
            ),
            remediations: vec![RemediationIntent::ClosePosition {
                account_id: ctx.account_id,
                contract_id: contract_id.clone(),
            }],
            lockout: None,
        })
    }
}
