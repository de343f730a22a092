//! The `Actor` trait — the contract every actor must fulfil.

use async_trait::async_trait;

use crate::{ActorError, ActorMetadata, RunContext};

/// The core actor trait.
///
/// Implementations declare what they consume, produce and belong to through
/// [`Actor::metadata`]; the engine schedules them from that declaration
/// alone and then calls [`Actor::process`] exactly once per scheduled slot.
#[async_trait]
pub trait Actor: Send + Sync {
    fn metadata(&self) -> &ActorMetadata;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Do the work.  Inputs come from `ctx.consume`, outputs go through
    /// `ctx.produce`, and problems are reported through `ctx.report_error`
    /// or by returning an error.
    async fn process(&self, ctx: &mut RunContext) -> Result<(), ActorError>;
}
