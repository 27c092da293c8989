//! The instrument rules file.
//!
//! One JSON object per tracked instrument, keyed by the instrument
//! identifier:
//!
//! ```json
//! {
//!   "BTC-XYZ": {
//!     "stop-trigger": 0.0010,
//!     "stop-limit": 0.00095,
//!     "target-trigger": 0.0015,
//!     "target": 0.0016,
//!     "quantity": 100
//!   }
//! }
//! ```
//!
//! The file is re-read in full at the start of every tick so edits
//! take effect on the next poll without a restart. A malformed entry
//! drops only that instrument; the rest keep being monitored.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exit parameters for one instrument. Read-only once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExitRule {
    /// Price at or below which the stop-loss sell is placed
    pub stop_trigger: Decimal,
    /// Limit price of the stop-loss sell
    pub stop_limit: Decimal,
    /// Price above which the take-profit sell is placed
    pub target_trigger: Decimal,
    /// Limit price of the take-profit sell
    pub target: Decimal,
    /// Quantity to sell on either exit
    pub quantity: Decimal,
}

/// An immutable snapshot of the rules file.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, ExitRule>,
}

impl RuleSet {
    /// Read and parse the rules file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Parse a rules document, skipping malformed entries.
    pub fn from_json(raw: &str) -> Result<Self> {
        let table: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).context("Rules file is not a JSON object")?;

        let mut rules = BTreeMap::new();
        for (instrument, value) in table {
            match serde_json::from_value::<ExitRule>(value) {
                Ok(rule) => {
                    if rule.stop_trigger >= rule.target_trigger {
                        // Kept anyway: the stop branch wins every tick,
                        // so the instrument degrades to stop-loss only.
                        warn!(
                            instrument = %instrument,
                            stop_trigger = %rule.stop_trigger,
                            target_trigger = %rule.target_trigger,
                            "Stop trigger is not below target trigger"
                        );
                    }
                    rules.insert(instrument, rule);
                }
                Err(e) => {
                    warn!(
                        instrument = %instrument,
                        error = %e,
                        "Skipping malformed rule entry"
                    );
                }
            }
        }

        Ok(Self { rules })
    }

    /// Instruments in deterministic (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExitRule)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, instrument: &str) -> Option<&ExitRule> {
        self.rules.get(instrument)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
