use rust_decimal::Decimal;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RiskRule, RuleContext, attributed_reason,
};

/// A loss magnitude threshold and the cooldown it earns.
#[derive(Debug, Clone, Copy)]
pub struct LossTier {
    /// Positive magnitude; a trade losing at least this much matches.
    pub loss_amount: Decimal,
    pub cooldown: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct CooldownAfterLossConfig {
    pub tiers: Vec<LossTier>,
}

/// A losing trade earns a breather. The deepest tier whose threshold the
/// loss reaches picks the cooldown duration; positions are left alone.
#[derive(Debug)]
pub struct CooldownAfterLoss {
    /// Tiers sorted ascending by magnitude.
    tiers: Vec<LossTier>,
}

impl CooldownAfterLoss {
    pub fn new(config: CooldownAfterLossConfig) -> Self {
        let mut tiers = config.tiers;
        tiers.sort_by(|a, b| a.loss_amount.cmp(&b.loss_amount));
        Self { tiers }
    }
}

impl RiskRule for CooldownAfterLoss {
    fn id(&self) -> &'static str {
        "cooldown_after_loss"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Trade]
    }

    fn evaluate(&self, event: &RiskEvent, _ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::Trade(trade) = event else {
            return None;
        };
        let pnl = trade.pnl?;
        if pnl >= Decimal::ZERO || trade.voided {
            return None;
        }

        let loss = -pnl;
        let tier = self
            .tiers
            .iter()
            .rev()
            .find(|tier| tier.loss_amount <= loss)?;

        let detail = format!(
            "trade {} lost {}, tier {} cooldown",
            trade.trade_id, loss, tier.loss_amount
        );
        Some(Breach {
            rule: self.id(),
            reason: detail.clone(),
            remediations: Vec::new(),
            lockout: Some(LockoutIntent::Cooldown {
                reason: attributed_reason(self.id(), &detail),
                duration: tier.cooldown,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::testkit::{CtxFixture, MNQ};
    use crate::domain::types::{OrderSide, Trade};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn rule() -> CooldownAfterLoss {
        CooldownAfterLoss::new(CooldownAfterLossConfig {
            tiers: vec![
                LossTier {
                    loss_amount: dec!(500),
                    cooldown: chrono::Duration::minutes(30),
                },
                LossTier {
                    loss_amount: dec!(100),
                    cooldown: chrono::Duration::minutes(5),
                },
                LossTier {
                    loss_amount: dec!(300),
                    cooldown: chrono::Duration::minutes(15),
                },
            ],
        })
    }

    fn losing_trade(pnl: Option<Decimal>, voided: bool) -> RiskEvent {
        RiskEvent::Trade(Trade {
            trade_id: 7,
            account_id: 1,
            contract_id: MNQ.to_string(),
            price: dec!(21000),
            pnl,
            fees: dec!(0.74),
            side: OrderSide::Ask,
            size: 1,
            voided,
            order_id: 3,
            executed_at: Utc::now(),
        })
    }

    #[test]
    fn picks_deepest_matching_tier() {
        let fixture = CtxFixture::new(1);
        // -350 reaches the 100 and 300 tiers; 300 is the deepest.
        let breach = rule()
            .evaluate(&losing_trade(Some(dec!(-350)), false), &fixture.ctx())
            .unwrap();
        match breach.lockout {
            Some(LockoutIntent::Cooldown { duration, .. }) => {
                assert_eq!(duration, chrono::Duration::minutes(15));
            }
            other => panic!("expected cooldown, got {:?}", other),
        }
        assert!(breach.remediations.is_empty());
    }

    #[test]
    fn small_loss_below_every_tier_is_quiet() {
        let fixture = CtxFixture::new(1);
        assert!(
            rule()
                .evaluate(&losing_trade(Some(dec!(-50)), false), &fixture.ctx())
                .is_none()
        );
    }

    #[test]
    fn winners_and_half_turns_are_quiet() {
        let fixture = CtxFixture::new(1);
        assert!(
            rule()
                .evaluate(&losing_trade(Some(dec!(200)), false), &fixture.ctx())
                .is_none()
        );
        assert!(
            rule()
                .evaluate(&losing_trade(None, false), &fixture.ctx())
                .is_none()
        );
    }

    #[test]
    fn voided_trades_are_quiet() {
        let fixture = CtxFixture::new(1);
        assert!(
            rule()
                .evaluate(&losing_trade(Some(dec!(-600)), true), &fixture.ctx())
                .is_none()
        );
    }

    #[test]
    fn exact_threshold_matches() {
        let fixture = CtxFixture::new(1);
        let breach = rule()
            .evaluate(&losing_trade(Some(dec!(-500)), false), &fixture.ctx())
            .unwrap();
        match breach.lockout {
            Some(LockoutIntent::Cooldown { duration, .. }) => {
                assert_eq!(duration, chrono::Duration::minutes(30));
            }
            other => panic!("expected cooldown, got {:?}", other),
        }
    }
}
