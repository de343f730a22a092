//! Per-phase error/retry policy and phase flags.

use serde::{Deserialize, Serialize};

/// What happens when an actor reports a fatal or error-level problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the whole workflow; no further actor runs.
    FailImmediately,
    /// Finish the remaining stages of the current phase, then stop.
    #[default]
    FailPhase,
    /// Record the error and carry on.
    ReportOnly,
}

/// Where a later run with the same execution id re-enters a failed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Re-run only the actors of the phase that have no checkpoint.
    RetryActor,
    /// Re-run the whole phase.
    #[default]
    RetryPhase,
    /// The failed phase is never re-entered.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Policy {
    pub error: ErrorPolicy,
    pub retry: RetryPolicy,
}

impl Policy {
    pub fn new(error: ErrorPolicy, retry: RetryPolicy) -> Self {
        Self { error, retry }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseFlags {
    /// Record a `phase-checkpoint` audit row when the phase is entered.
    #[serde(default)]
    pub is_checkpoint: bool,
    /// End the run after this phase if an actor asked for a restart.
    #[serde(default)]
    pub request_restart_after_phase: bool,
    /// Always end the run after this phase so the host can restart.
    #[serde(default)]
    pub restart_after_phase: bool,
}

impl PhaseFlags {
    pub fn checkpoint() -> Self {
        Self {
            is_checkpoint: true,
            ..Self::default()
        }
    }
}
