use std::collections::HashMap;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RemediationIntent, RiskRule, RuleContext, attributed_reason,
};
use crate::domain::session::SessionWindow;

#[derive(Debug, Clone)]
pub struct SessionBlockConfig {
    /// The default trading window, in the account's timezone.
    pub window: SessionWindow,
    /// Per-symbol window overrides.
    pub overrides: HashMap<String, SessionWindow>,
    /// Flatten and lock when the window closes with positions still open.
    pub close_at_session_end: bool,
}

/// Blocks holding positions outside the configured session window.
///
/// Holidays count as outside-window days. A new position outside the window
/// is closed and the account locked until the next session start; at window
/// close the whole account is optionally flattened.
#[derive(Debug)]
pub struct SessionBlockOutside {
    config: SessionBlockConfig,
}

impl SessionBlockOutside {
    pub fn new(config: SessionBlockConfig) -> Self {
        Self { config }
    }

    fn window_for(&self, symbol: &str) -> &SessionWindow {
        self.config.overrides.get(symbol).unwrap_or(&self.config.window)
    }
}

impl RiskRule for SessionBlockOutside {
    fn id(&self) -> &'static str {
        "session_block_outside"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Position, EventKind::SessionBoundary]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        match event {
            RiskEvent::Position(position) if position.size > 0 => {
                let window = self.window_for(position.symbol());
                if ctx.clock.in_session(window, ctx.now, ctx.holidays) {
                    return None;
                }
                let until = ctx.clock.next_session_open(window, ctx.now, ctx.holidays);
                let detail = format!(
                    "position in {} opened outside session window",
                    position.symbol()
                );
                Some(Breach {
                    rule: self.id(),
                    reason: detail.clone(),
                    remediations: vec![
                        RemediationIntent::ClosePosition {
                            account_id: ctx.account_id,
                            contract_id: position.contract_id.clone(),
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
            RiskEvent::SessionBoundary { .. } => {
                if !self.config.close_at_session_end || ctx.positions.is_empty() {
                    return None;
                }
                // Only act when some held symbol's window has closed.
                let any_outside = ctx.positions.iter().any(|p| {
                    !ctx.clock
                        .in_session(self.window_for(p.symbol()), ctx.now, ctx.holidays)
                });
                if !any_outside {
                    return None;
                }
                let until =
                    ctx.clock
                        .next_session_open(&self.config.window, ctx.now, ctx.holidays);
                let detail = "session window closed with open positions".to_string();
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
            _ => None,
        }
    }
}
