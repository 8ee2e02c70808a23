use std::collections::HashSet;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RemediationIntent, RiskRule, RuleContext, attributed_reason,
};
use crate::domain::types::Lockout;

#[derive(Debug, Clone, Default)]
pub struct SymbolBlocksConfig {
    pub blocked_symbols: HashSet<String>,
}

/// Forbids positions in blocklisted symbols outright: close on sight and
/// place a manual-only symbol lockout.
#[derive(Debug)]
pub struct SymbolBlocks {
    config: SymbolBlocksConfig,
}

impl SymbolBlocks {
    pub fn new(config: SymbolBlocksConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for SymbolBlocks {
    fn id(&self) -> &'static str {
        "symbol_blocks"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Position]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::Position(position) = event else {
            return None;
        };
        if position.size == 0 {
            return None;
        }
        let symbol = position.symbol();
        if !self.config.blocked_symbols.contains(symbol) {
            return None;
        }

        let detail = format!("symbol {} is blocked", symbol);
        Some(Breach {
            rule: self.id(),
            reason: detail.clone(),
            remediations: vec![RemediationIntent::ClosePosition {
                account_id: ctx.account_id,
                contract_id: position.contract_id.clone(),
            }],
            lockout: Some(LockoutIntent::Symbol {
                symbol: symbol.to_string(),
                reason: attributed_reason(self.id(), &detail),
                until: Lockout::never(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::testkit::{CtxFixture, MNQ, RTY};
    use crate::domain::types::PositionSide;
    use rust_decimal_macros::dec;

    fn rule() -> SymbolBlocks {
        SymbolBlocks::new(SymbolBlocksConfig {
            blocked_symbols: ["RTY".to_string()].into_iter().collect(),
        })
    }

    #[test]
    fn blocked_symbol_closed_and_locked() {
        let fixture = CtxFixture::new(1)
            .with_position(RTY, PositionSide::Long, 1, dec!(2200));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule().evaluate(&event, &fixture.ctx()).unwrap();
        assert_eq!(
            breach.remediations,
            vec![RemediationIntent::ClosePosition {
                account_id: 1,
                contract_id: RTY.to_string(),
            }]
        );
        match breach.lockout {
            Some(LockoutIntent::Symbol { ref symbol, until, .. }) => {
                assert_eq!(symbol, "RTY");
                assert_eq!(until, Lockout::never());
            }
            ref other => panic!("expected symbol lockout, got {:?}", other),
        }
    }

    #[test]
    fn unblocked_symbol_is_quiet() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 1, dec!(21000));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(rule().evaluate(&event, &fixture.ctx()).is_none());
    }

    #[test]
    fn flat_update_is_quiet() {
        let mut fixture = CtxFixture::new(1)
            .with_position(RTY, PositionSide::Long, 1, dec!(2200));
        fixture.positions[0].size = 0;
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(rule().evaluate(&event, &fixture.ctx()).is_none());
    }
}
