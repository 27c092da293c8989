//! Per-instrument guard bookkeeping.

use std::collections::HashMap;

/// The one protective sell this process believes is resting on the
/// books for an instrument.
///
/// Holding it as an enum makes "at most one of stop/target open"
/// impossible to violate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RestingSell {
    #[default]
    None,
    Stop { order_id: String },
    Target { order_id: String },
}

/// Guard state for a single instrument.
///
/// Purely in-memory: a fresh process starts with no assumed resting
/// orders, relying on the pre-placement sweep to catch anything real
/// left on the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuardState {
    pub resting: RestingSell,
}

impl GuardState {
    pub fn stop_sell_open(&self) -> bool {
        matches!(self.resting, RestingSell::Stop { .. })
    }

    pub fn target_sell_open(&self) -> bool {
        matches!(self.resting, RestingSell::Target { .. })
    }

    pub fn order_id(&self) -> Option<&str> {
        match &self.resting {
            RestingSell::None => None,
            RestingSell::Stop { order_id } | RestingSell::Target { order_id } => Some(order_id),
        }
    }
}

/// Owned store of guard state, keyed by instrument identifier.
///
/// Entries are created all-clear when an instrument is first seen and
/// never removed: an instrument dropped from the rules file keeps its
/// last known state, so re-adding it resumes with memory of the last
/// known order. Only the reconciliation loop mutates this, via
/// `commit`.
#[derive(Debug, Default)]
pub struct GuardBook {
    states: HashMap<String, GuardState>,
}

impl GuardBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the state for an instrument, initializing a default entry
    /// if this is the first time we see it.
    pub fn ensure(&mut self, instrument: &str) -> &GuardState {
        self.states.entry(instrument.to_string()).or_default()
    }

    pub fn get(&self, instrument: &str) -> Option<&GuardState> {
        self.states.get(instrument)
    }

    /// Replace the state for one instrument. Called once per
    /// instrument per tick, after all of its actions completed.
    pub fn commit(&mut self, instrument: &str, next: GuardState) {
        self.states.insert(instrument.to_string(), next);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
