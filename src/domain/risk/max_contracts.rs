use serde::{Deserialize, Serialize};

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{Breach, RemediationIntent, RiskRule, RuleContext};
use crate::domain::types::Position;

/// What to do when a contract-count limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractLimitMode {
    /// Shed only the excess, partial-closing the largest position first.
    ReduceToLimit,
    /// Flatten everything in scope.
    CloseAll,
}

/// Configuration for the account-wide contract cap.
#[derive(Debug, Clone)]
pub struct MaxContractsConfig {
    /// Maximum Σ|size| across all open positions.
    pub limit: u32,
    pub mode: ContractLimitMode,
}

/// Caps total open contracts across every instrument.
#[derive(Debug)]
pub struct MaxContracts {
    config: MaxContractsConfig,
}

impl MaxContracts {
    pub fn new(config: MaxContractsConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for MaxContracts {
    fn id(&self) -> &'static str {
        "max_contracts"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Position]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let RiskEvent::Position(_) = event else {
            return None;
        };

        let total = ctx.total_open_size();
        if total <= self.config.limit {
            return None;
        }

        let remediations = match self.config.mode {
            ContractLimitMode::CloseAll => vec![RemediationIntent::CloseAll {
                account_id: ctx.account_id,
            }],
            ContractLimitMode::ReduceToLimit => {
                shed_excess(ctx.positions, total - self.config.limit, ctx.account_id)
            }
        };

        Some(Breach {
            rule: self.id(),
            reason: format!(
                "open contracts {} exceed limit {}",
                total, self.config.limit
            ),
            remediations,
            lockout: None,
        })
    }
}

/// Builds close/partial-close intents shedding `excess` contracts, largest
/// position first.
pub(crate) fn shed_excess(
    positions: &[Position],
    mut excess: u32,
    account_id: i64,
) -> Vec<RemediationIntent> {
    let mut by_size: Vec<&Position> = positions.iter().filter(|p| p.size > 0).collect();
    by_size.sort_by(|a, b| b.size.cmp(&a.size).then(a.contract_id.cmp(&b.contract_id)));

    let mut intents = Vec::new();
    for position in by_size {
        if excess == 0 {
            break;
        }
        let shed = excess.min(position.size);
        if shed == position.size {
            intents.push(RemediationIntent::ClosePosition {
                account_id,
                contract_id: position.contract_id.clone(),
            });
        } else {
            intents.push(RemediationIntent::PartialClose {
                account_id,
                contract_id: position.contract_id.clone(),
                size: shed,
            });
        }
        excess -= shed;
    }
    intents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::testkit::{CtxFixture, ES, MNQ, position};
    use crate::domain::types::PositionSide;
    use rust_decimal_macros::dec;

    fn rule(limit: u32, mode: ContractLimitMode) -> MaxContracts {
        MaxContracts::new(MaxContractsConfig { limit, mode })
    }

    #[test]
    fn under_limit_is_quiet() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 2, dec!(21000));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(
            rule(3, ContractLimitMode::ReduceToLimit)
                .evaluate(&event, &fixture.ctx())
                .is_none()
        );
    }

    #[test]
    fn reduce_to_limit_sheds_largest_first() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 3, dec!(21000))
            .with_position(ES, PositionSide::Short, 1, dec!(5800));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule(3, ContractLimitMode::ReduceToLimit)
            .evaluate(&event, &fixture.ctx())
            .unwrap();
        // Excess 1, MNQ is largest: a single partial close of 1.
        assert_eq!(
            breach.remediations,
            vec![RemediationIntent::PartialClose {
                account_id: 1,
                contract_id: MNQ.to_string(),
                size: 1,
            }]
        );
        assert!(breach.lockout.is_none());
    }

    #[test]
    fn reduce_spans_positions_when_excess_is_deep() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 2, dec!(21000))
            .with_position(ES, PositionSide::Long, 2, dec!(5800));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule(1, ContractLimitMode::ReduceToLimit)
            .evaluate(&event, &fixture.ctx())
            .unwrap();
        // Excess 3: full close of one position, partial of the next.
        assert_eq!(breach.remediations.len(), 2);
        assert!(matches!(
            breach.remediations[0],
            RemediationIntent::ClosePosition { .. }
        ));
        assert!(matches!(
            breach.remediations[1],
            RemediationIntent::PartialClose { size: 1, .. }
        ));
    }

    #[test]
    fn close_all_mode_flattens() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 5, dec!(21000));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule(2, ContractLimitMode::CloseAll)
            .evaluate(&event, &fixture.ctx())
            .unwrap();
        assert_eq!(
            breach.remediations,
            vec![RemediationIntent::CloseAll { account_id: 1 }]
        );
    }

    #[test]
    fn shed_excess_exact_boundary() {
        let now = chrono::Utc::now();
        let positions = vec![position(1, MNQ, PositionSide::Long, 2, dec!(21000), now)];
        let intents = shed_excess(&positions, 2, 1);
        assert_eq!(
            intents,
            vec![RemediationIntent::ClosePosition {
                account_id: 1,
                contract_id: MNQ.to_string(),
            }]
        );
    }
}
