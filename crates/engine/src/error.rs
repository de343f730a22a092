//! Engine-level error types.

use thiserror::Error;

use crate::stage::StagePosition;

/// Errors produced by the workflow engine (loading, scheduling, execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Load-time usage errors ------

    /// Two or more actors share the same name.
    #[error("duplicate actor name: '{0}'")]
    DuplicateActor(String),

    /// Two capabilities were registered under one name.
    #[error("duplicate capability name: '{0}'")]
    DuplicateCapability(String),

    /// Every actor must belong to at least one tag group.
    #[error("actor '{0}' declares no tags")]
    ActorWithoutTags(String),

    /// A tag was referenced that was never registered.
    #[error("unregistered tag '{tag}' referenced by {referenced_by}")]
    UnknownTag { tag: String, referenced_by: String },

    /// A capability was referenced that was never registered.
    #[error("unknown capability '{capability}' referenced by {referenced_by}")]
    UnknownCapability {
        capability: String,
        referenced_by: String,
    },

    /// Capabilities depend on each other in a loop.
    #[error("capability dependency cycle: {}", .cycle.join(" -> "))]
    CapabilityCycle { cycle: Vec<String> },

    /// Two phases of one workflow share a name.
    #[error("duplicate phase name: '{0}'")]
    DuplicatePhase(String),

    // ------ Scheduling errors ------

    /// Actors of one stage consume each other's output in a loop.
    #[error("dependency cycle in {phase}.{stage} between actors: {}", .actors.join(", "))]
    DependencyCycle {
        phase: String,
        stage: StagePosition,
        actors: Vec<String>,
    },

    // ------ Run option errors ------

    /// A run option names a phase the workflow does not have.
    #[error("workflow has no phase named '{0}'")]
    UnknownPhase(String),

    /// A stop target names nothing the workflow would run.
    #[error("invalid stop target '{0}'")]
    InvalidStopTarget(String),

    // ------ Resume errors ------

    /// No run was ever recorded under this execution id.
    #[error("no execution recorded with id '{0}'")]
    UnknownExecution(String),

    /// The failed phase does not allow being retried.
    #[error("phase '{phase}' failed and its retry policy is disabled")]
    RetryDisabled { phase: String },

    // ------ Run-time errors ------

    /// Another run holds the execution id.
    #[error("execution '{0}' is already running")]
    ExecutionLocked(String),

    /// Persistence error from the db crate.  Always aborts the run.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
