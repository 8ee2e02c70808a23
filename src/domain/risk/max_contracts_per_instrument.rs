use std::collections::HashMap;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::max_contracts::{ContractLimitMode, shed_excess};
use crate::domain::risk::rule::{Breach, RemediationIntent, RiskRule, RuleContext};
use crate::domain::types::Position;

/// How to treat symbols without a configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownSymbolPolicy {
    /// No position may be held in an unlisted symbol.
    Block,
    AllowUnlimited,
    AllowWithLimit(u32),
}

#[derive(Debug, Clone)]
pub struct PerInstrumentConfig {
    /// Per-symbol contract caps, e.g. `MNQ → 2`.
    pub limits: HashMap<String, u32>,
    pub unknown_policy: UnknownSymbolPolicy,
    pub mode: ContractLimitMode,
}

/// Caps open contracts per instrument symbol.
#[derive(Debug)]
pub struct MaxContractsPerInstrument {
    config: PerInstrumentConfig,
}

impl MaxContractsPerInstrument {
    pub fn new(config: PerInstrumentConfig) -> Self {
        Self { config }
    }

    fn limit_for(&self, symbol: &str) -> Option<u32> {
        if let Some(limit) = self.config.limits.get(symbol) {
            return Some(*limit);
        }
        match self.config.unknown_policy {
            UnknownSymbolPolicy::Block => Some(0),
            UnknownSymbolPolicy::AllowUnlimited => None,
            UnknownSymbolPolicy::AllowWithLimit(limit) => Some(limit),
        }
    }
}

impl RiskRule for MaxContractsPerInstrument {
    fn id(&self) -> &'static str {
        "max_contracts_per_instrument"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Position]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::Position(position) = event else {
            return None;
        };

        let symbol = position.symbol().to_string();
        let limit = self.limit_for(&symbol)?;
        let held = ctx.open_size_for_symbol(&symbol);
        if held <= limit {
            return None;
        }

        let in_symbol: Vec<Position> = ctx
            .positions
            .iter()
            .filter(|p| p.symbol() == symbol)
            .cloned()
            .collect();

        let remediations = match self.config.mode {
            ContractLimitMode::ReduceToLimit => {
                shed_excess(&in_symbol, held - limit, ctx.account_id)
            }
            // Scoped mode: flatten every position in this symbol only.
            ContractLimitMode::CloseAll => in_symbol
                .iter()
                .map(|p| RemediationIntent::ClosePosition {
                    account_id: ctx.account_id,
                    contract_id: p.contract_id.clone(),
                })
                .collect(),
        };

        Some(Breach {
            rule: self.id(),
            reason: format!("{} holds {} contracts, limit {}", symbol, held, limit),
            remediations,
            lockout: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::testkit::{CtxFixture, MNQ, RTY};
    use crate::domain::types::PositionSide;
    use rust_decimal_macros::dec;

    fn rule(limits: &[(&str, u32)], policy: UnknownSymbolPolicy) -> MaxContractsPerInstrument {
        MaxContractsPerInstrument::new(PerInstrumentConfig {
            limits: limits
                .iter()
                .map(|(s, n)| (s.to_string(), *n))
                .collect(),
            unknown_policy: policy,
            mode: ContractLimitMode::ReduceToLimit,
        })
    }

    #[test]
    fn reduces_excess_for_listed_symbol() {
        // Scenario: MNQ limit 2, position arrives at size 3.
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 3, dec!(21000));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule(&[("MNQ", 2)], UnknownSymbolPolicy::AllowUnlimited)
            .evaluate(&event, &fixture.ctx())
            .unwrap();
        assert_eq!(
            breach.remediations,
            vec![RemediationIntent::PartialClose {
                account_id: 1,
                contract_id: MNQ.to_string(),
                size: 1,
            }]
        );
    }

    #[test]
    fn at_limit_is_quiet() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 2, dec!(21000));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(
            rule(&[("MNQ", 2)], UnknownSymbolPolicy::AllowUnlimited)
                .evaluate(&event, &fixture.ctx())
                .is_none()
        );
    }

    #[test]
    fn unknown_symbol_blocked() {
        let fixture = CtxFixture::new(1)
            .with_position(RTY, PositionSide::Long, 1, dec!(2200));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule(&[("MNQ", 2)], UnknownSymbolPolicy::Block)
            .evaluate(&event, &fixture.ctx())
            .unwrap();
        // Limit 0: the whole position goes.
        assert_eq!(
            breach.remediations,
            vec![RemediationIntent::ClosePosition {
                account_id: 1,
                contract_id: RTY.to_string(),
            }]
        );
    }

    #[test]
    fn unknown_symbol_allowed_with_limit() {
        let fixture = CtxFixture::new(1)
            .with_position(RTY, PositionSide::Long, 2, dec!(2200));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let rule = rule(&[], UnknownSymbolPolicy::AllowWithLimit(3));
        assert!(rule.evaluate(&event, &fixture.ctx()).is_none());
    }

    #[test]
    fn unknown_symbol_unlimited_is_quiet() {
        let fixture = CtxFixture::new(1)
            .with_position(RTY, PositionSide::Long, 50, dec!(2200));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(
            rule(&[], UnknownSymbolPolicy::AllowUnlimited)
                .evaluate(&event, &fixture.ctx())
                .is_none()
        );
    }
}
