use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RiskRule, RuleContext, attributed_reason,
};
use crate::domain::types::WindowKind;

/// Limit and penalty for one rolling window.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimit {
    pub max_trades: u32,
    pub cooldown: chrono::Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TradeFrequencyConfig {
    pub per_minute: Option<WindowLimit>,
    pub per_hour: Option<WindowLimit>,
    pub per_session: Option<WindowLimit>,
}

/// Throttles overtrading with a cooldown; never touches positions.
///
/// Windows are checked minute → hour → session and the first exceeded one
/// sets its cooldown.
#[derive(Debug)]
pub struct TradeFrequencyLimit {
    config: TradeFrequencyConfig,
}

impl TradeFrequencyLimit {
    pub fn new(config: TradeFrequencyConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for TradeFrequencyLimit {
    fn id(&self) -> &'static str {
        "trade_frequency_limit"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Trade]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::Trade(_) = event else {
            return None;
        };

        let checks = [
            (WindowKind::Minute, self.config.per_minute, ctx.trades_last_minute),
            (WindowKind::Hour, self.config.per_hour, ctx.trades_last_hour),
            (WindowKind::Session, self.config.per_session, ctx.trades_this_session),
        ];

        for (window, limit, count) in checks {
            let Some(limit) = limit else { continue };
            if count > limit.max_trades {
                let detail = format!(
                    "{} trades in {} window exceed limit {}",
                    count, window, limit.max_trades
                );
                return Some(Breach {
                    rule: self.id(),
                    reason: detail.clone(),
                    remediations: Vec::new(),
                    lockout: Some(LockoutIntent::Cooldown {
                        reason: attributed_reason(self.id(), &detail),
                        duration: limit.cooldown,
                    }),
                });
            }
        }
        None
    }
}
