use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RemediationIntent, RiskRule, RuleContext, attributed_reason,
};
use crate::domain::types::Lockout;

/// Reacts to the gateway revoking trading permission.
///
/// `can_trade=false` flattens the account, cancels everything, and places a
/// manual-only hard lockout. A later `can_trade=true` lifts only the
/// lockouts this rule placed; lockouts from other rules stand.
#[derive(Debug)]
pub struct AuthLossGuard;

impl AuthLossGuard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AuthLossGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskRule for AuthLossGuard {
    fn id(&self) -> &'static str {
        "auth_loss_guard"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::AccountFlags]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::AccountFlags(flags) = event else {
            return None;
        };

        if !flags.can_trade {
            let detail = format!("gateway disabled trading for account {}", flags.account_id);
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
                    until: Lockout::never(),
                }),
            })
        } else {
            // Clearing a lockout that is not there is a no-op, so this is
            // emitted unconditionally.
            Some(Breach {
                rule: self.id(),
                reason: format!("gateway re-enabled trading for account {}", flags.account_id),
                remediations: Vec::new(),
                lockout: Some(LockoutIntent::ClearAttributed { rule: self.id() }),
            })
        }
    }
}
