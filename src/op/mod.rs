pub mod params;
pub mod state_change;

pub use state_change::{Operation, StateChange};

/// Re-exported so callers can build parameters without naming serde_json.
pub use serde_json::{json, Value};
