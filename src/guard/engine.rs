//! Pure exit evaluation: (guard state, last price, rule) -> plan.
//!
//! No side effects here; the reconciliation loop executes the plan
//! against the exchange and commits the resulting state.

use rust_decimal::Decimal;

use crate::rules::ExitRule;

use super::state::{GuardState, RestingSell};

/// Which protective sell a placement is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Stop,
    Target,
}

impl ExitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitKind::Stop => "stop",
            ExitKind::Target => "target",
        }
    }
}

/// A limit sell the loop should place, after sweeping anything
/// already resting on the exchange for the instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub kind: ExitKind,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Actions for one instrument in one tick, in application order:
/// cancel the conflicting target order first, then sweep-and-place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    /// Resting take-profit order to cancel before the stop goes on.
    pub cancel_target: Option<String>,
    /// Fresh sell to place, preceded by the defensive sweep.
    pub placement: Option<Placement>,
}

impl Plan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cancel_target.is_none() && self.placement.is_none()
    }
}

/// Decide what to do for one instrument given the latest price.
///
/// The stop check runs first: a stop-loss outranks a resting
/// take-profit in the same tick. `last == stop_trigger` fires the
/// stop while `last == target_trigger` is still the wait zone; the
/// boundary asymmetry is deliberate.
pub fn evaluate(state: &GuardState, last: Decimal, rule: &ExitRule) -> Plan {
    if last <= rule.stop_trigger {
        let cancel_target = match &state.resting {
            RestingSell::Target { order_id } => Some(order_id.clone()),
            _ => None,
        };

        // Already resting a stop sell: nothing to do. We do not
        // re-verify that the order still sits on the exchange.
        let placement = if state.stop_sell_open() {
            None
        } else {
            Some(Placement {
                kind: ExitKind::Stop,
                price: rule.stop_limit,
                quantity: rule.quantity,
            })
        };

        Plan {
            cancel_target,
            placement,
        }
    } else if last > rule.target_trigger {
        if state.target_sell_open() {
            Plan::none()
        } else {
            // Any resting stop sell is removed by the pre-placement
            // sweep; committing the new target replaces it locally.
            Plan {
                cancel_target: None,
                placement: Some(Placement {
                    kind: ExitKind::Target,
                    price: rule.target,
                    quantity: rule.quantity,
                }),
            }
        }
    } else {
        // Wait zone: stop_trigger < last <= target_trigger.
        Plan::none()
    }
}
