//! The exit guard core: per-instrument state and the pure evaluation
//! engine that turns a price sample into actions.

mod engine;
mod state;

pub use engine::{evaluate, ExitKind, Placement, Plan};
pub use state::{GuardBook, GuardState, RestingSell};
