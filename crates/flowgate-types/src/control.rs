//! Operator control commands injected into a live run.

use serde::{Deserialize, Serialize};

/// A command for a run's control channel.
///
/// Commands take effect at the next run-loop boundary; a step in flight
/// always runs to completion first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Pause,
    Resume,
    Cancel,
    Skip { step_id: String },
    Jump { step_id: String },
}
