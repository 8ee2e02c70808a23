use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::events::{EventKind, RiskEvent};
use crate::domain::risk::rule::{
    Breach, OrderChanges, RemediationIntent, RiskRule, RuleContext,
};
use crate::domain::types::{ContractId, OrderSide, Position, PositionSide};

#[derive(Debug, Clone, Copy)]
pub struct TradeManagementConfig {
    /// Profit in ticks at which the stop moves to entry.
    pub breakeven_trigger_ticks: u32,
    /// Profit in ticks at which trailing takes over.
    pub trailing_activation_ticks: u32,
    /// Distance in ticks the trailed stop keeps from the current price.
    pub trailing_distance_ticks: u32,
}

/// Manages the protective stop of a winning position: break-even first,
/// trailing after. Never closes anything, never locks anything, and never
/// moves a stop backwards.
///
/// The "associated" stop is the most recent open stop-kind order on the
/// protecting side of the same contract; a tie on update timestamp is
/// resolved to the highest order id and logged.
#[derive(Debug)]
pub struct TradeManagement {
    config: TradeManagementConfig,
}

impl TradeManagement {
    pub fn new(config: TradeManagementConfig) -> Self {
        Self { config }
    }

    fn desired_stop(
        &self,
        position: &Position,
        last: Decimal,
        tick_size: Decimal,
    ) -> Option<Decimal> {
        let profit_ticks = match position.side {
            PositionSide::Long => (last - position.average_price) / tick_size,
            PositionSide::Short => (position.average_price - last) / tick_size,
        };

        if profit_ticks >= Decimal::from(self.config.trailing_activation_ticks) {
            let distance = Decimal::from(self.config.trailing_distance_ticks) * tick_size;
            Some(match position.side {
                PositionSide::Long => last - distance,
                PositionSide::Short => last + distance,
            })
        } else if profit_ticks >= Decimal::from(self.config.breakeven_trigger_ticks) {
            Some(position.average_price)
        } else {
            None
        }
    }

    fn evaluate_contract(&self, contract_id: &ContractId, ctx: &RuleContext<'_>) -> Option<Breach> {
        let position = ctx
            .positions
            .iter()
            .find(|p| &p.contract_id == contract_id && p.size > 0)?;
        let last = ctx.last_price(contract_id)?;
        let spec = ctx.specs.get(contract_id)?;
        if spec.tick_size.is_zero() {
            return None;
        }

        let protecting = OrderSide::protecting(position.side);
        let candidates: Vec<_> = ctx
            .orders
            .iter()
            .filter(|o| {
                &o.contract_id == contract_id
                    && o.side == protecting
                    && o.order_type.is_stop_kind()
                    && o.is_open()
            })
            .collect();
        let stop = ctx.latest_stop_order(contract_id, protecting)?;
        if candidates
            .iter()
            .filter(|o| o.updated_at == stop.updated_at)
            .count()
            > 1
        {
            warn!(
                account_id = ctx.account_id,
                contract_id = %contract_id,
                order_id = stop.order_id,
                "ambiguous stop association, picking highest order id"
            );
        }

        let desired = self.desired_stop(position, last, spec.tick_size)?;
        let current = stop.stop_price?;

        // Only ever tighten.
        let improves = match position.side {
            PositionSide::Long => desired > current,
            PositionSide::Short => desired < current,
        };
        if !improves {
            return None;
        }

        Some(Breach {
            rule: self.id(),
            reason: format!(
                "moving stop {} from {} to {} on {}",
                stop.order_id,
                current,
                desired,
                position.symbol()
            ),
            remediations: vec![RemediationIntent::ModifyOrder {
                account_id: ctx.account_id,
                order_id: stop.order_id,
                changes: OrderChanges {
                    stop_price: Some(desired),
                    ..OrderChanges::default()
                },
            }],
            lockout: None,
        })
    }
}

impl RiskRule for TradeManagement {
    fn id(&self) -> &'static str {
        "trade_management"
    }

    fn inputs(&self) -> &'static [EventKind] {
        &[EventKind::Position, EventKind::Quote]
    }

    fn evaluate(&self, event: &RiskEvent, ctx: &RuleContext<'_>) -> Option<Breach> {
        let contract_id = match event {
            RiskEvent::Position(p) => &p.contract_id,
            RiskEvent::Quote(q) => &q.contract_id,
            _ => return None,
        };
        self.evaluate_contract(contract_id, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::testkit::{CtxFixture, MNQ, stop_order};
    use rust_decimal_macros::dec;

    fn rule() -> TradeManagement {
        TradeManagement::new(TradeManagementConfig {
            breakeven_trigger_ticks: 20,
            trailing_activation_ticks: 60,
            trailing_distance_ticks: 40,
        })
    }

    fn fixture_with_stop(last: Decimal, stop_price: Decimal) -> CtxFixture {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 1, dec!(21000))
            .with_quote(MNQ, last)
            .with_spec(MNQ, dec!(0.25), dec!(0.5));
        let now = fixture.now;
        fixture.with_order(stop_order(1, 100, MNQ, OrderSide::Ask, stop_price, now))
    }

    fn tick_event() -> RiskEvent {
        RiskEvent::UnrealizedTick { account_id: 1 }
    }

    #[test]
    fn breakeven_move_at_trigger() {
        // +5 points = 20 ticks: stop moves from 20990 to entry 21000.
        let fixture = fixture_with_stop(dec!(21005), dec!(20990));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule().evaluate(&event, &fixture.ctx()).unwrap();
        match &breach.remediations[0] {
            RemediationIntent::ModifyOrder { order_id, changes, .. } => {
                assert_eq!(*order_id, 100);
                assert_eq!(changes.stop_price, Some(dec!(21000)));
            }
            other => panic!("expected modify, got {:?}", other),
        }
    }

    #[test]
    fn trailing_overrides_breakeven_when_deep_in_profit() {
        // +20 points = 80 ticks >= 60: trail 40 ticks (10 points) behind.
        let fixture = fixture_with_stop(dec!(21020), dec!(21000));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule().evaluate(&event, &fixture.ctx()).unwrap();
        match &breach.remediations[0] {
            RemediationIntent::ModifyOrder { changes, .. } => {
                assert_eq!(changes.stop_price, Some(dec!(21010)));
            }
            other => panic!("expected modify, got {:?}", other),
        }
    }

    #[test]
    fn never_regresses() {
        // Price pulled back: desired trail 21010 - stop already at 21012.
        let fixture = fixture_with_stop(dec!(21020), dec!(21012));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(rule().evaluate(&event, &fixture.ctx()).is_none());
    }

    #[test]
    fn below_trigger_is_quiet() {
        // +2 points = 8 ticks < 20.
        let fixture = fixture_with_stop(dec!(21002), dec!(20990));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(rule().evaluate(&event, &fixture.ctx()).is_none());
    }

    #[test]
    fn no_stop_order_means_nothing_to_manage() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Long, 1, dec!(21000))
            .with_quote(MNQ, dec!(21020))
            .with_spec(MNQ, dec!(0.25), dec!(0.5));
        let event = RiskEvent::Position(fixture.positions[0].clone());
        assert!(rule().evaluate(&event, &fixture.ctx()).is_none());
    }

    #[test]
    fn short_position_trails_downward() {
        let fixture = CtxFixture::new(1)
            .with_position(MNQ, PositionSide::Short, 1, dec!(21000))
            .with_quote(MNQ, dec!(20980))
            .with_spec(MNQ, dec!(0.25), dec!(0.5));
        let now = fixture.now;
        let fixture =
            fixture.with_order(stop_order(1, 100, MNQ, OrderSide::Bid, dec!(21000), now));
        // +20 points profit = 80 ticks: trail to 20980 + 10 = 20990.
        let breach = rule().evaluate(&tick_event(), &fixture.ctx());
        // UnrealizedTick is not an input; use a position event instead.
        assert!(breach.is_none());
        let event = RiskEvent::Position(fixture.positions[0].clone());
        let breach = rule().evaluate(&event, &fixture.ctx()).unwrap();
        match &breach.remediations[0] {
            RemediationIntent::ModifyOrder { changes, .. } => {
                assert_eq!(changes.stop_price, Some(dec!(20990)));
            }
            other => panic!("expected modify, got {:?}", other),
        }
    }
}
