//! Actor-level error type.

use thiserror::Error;

/// Errors returned by an actor's `process` method or by its `RunContext`.
///
/// The engine uses the variant to decide what happens next:
/// - `Bus`: the store failed; the whole run is aborted.
/// - everything else: recorded as a fatal report from the actor and
///   handled by the phase's error policy.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The actor gave up; the message is recorded as a fatal error report.
    #[error("actor failed: {0}")]
    Failed(String),

    /// The actor tried to produce a type it never declared.
    #[error("actor '{actor}' produced undeclared message type '{msg_type}'")]
    UndeclaredProduce { actor: String, msg_type: String },

    /// The actor asked for a type it never declared.
    #[error("actor '{actor}' consumed undeclared message type '{msg_type}'")]
    UndeclaredConsume { actor: String, msg_type: String },

    /// Persistence error from the message bus.
    #[error("message bus error: {0}")]
    Bus(#[from] db::DbError),
}
