//! Isolated actor execution.
//!
//! The executor never calls `Actor::process` directly; it hands the actor
//! and its [`RunContext`] to an [`ActorRunner`] and only looks at what comes
//! back.  [`TaskRunner`] puts every invocation on its own tokio task so a
//! panic inside an actor is contained and surfaces as [`ActorExit::Crashed`].

use std::any::Any;
use std::sync::Arc;

use actors::{Actor, ActorError, RunContext};
use async_trait::async_trait;
use tracing::error;

/// How one actor invocation ended.
#[derive(Debug)]
pub enum ActorExit {
    /// `process` returned.  The context carries reported errors and
    /// commands.
    Finished {
        ctx: RunContext,
        result: Result<(), ActorError>,
    },
    /// The invocation died without returning.
    Crashed { reason: String },
}

#[async_trait]
pub trait ActorRunner: Send + Sync {
    async fn run(&self, actor: Arc<dyn Actor>, ctx: RunContext) -> ActorExit;
}

/// Runs each actor on a dedicated tokio task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskRunner;

#[async_trait]
impl ActorRunner for TaskRunner {
    async fn run(&self, actor: Arc<dyn Actor>, mut ctx: RunContext) -> ActorExit {
        let name = actor.name().to_string();
        let handle = tokio::spawn(async move {
            let result = actor.process(&mut ctx).await;
            (ctx, result)
        });

        match handle.await {
            Ok((ctx, result)) => ActorExit::Finished { ctx, result },
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    format!("actor panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "actor task was cancelled".to_string()
                };
                error!(actor = %name, %reason, "actor crashed");
                ActorExit::Crashed { reason }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actors::mock::MockActor;
    use actors::ActorMetadata;
    use db::{MessageBus, Origin, StoreConfig};

    async fn context(dir: &tempfile::TempDir) -> RunContext {
        let bus = MessageBus::open(&StoreConfig::in_dir(dir.path())).await.unwrap();
        let origin = Origin::new("exec", "host", "a", "facts");
        let none: [actors::MessageType; 0] = [];
        RunContext::new(bus, origin, &none, &none)
    }

    #[tokio::test]
    async fn finished_actor_returns_its_context() {
        let dir = tempfile::tempdir().unwrap();
        let actor = Arc::new(MockActor::new(ActorMetadata::new("a")).requesting_restart());

        match TaskRunner.run(actor.clone(), context(&dir).await).await {
            ActorExit::Finished { ctx, result } => {
                assert!(result.is_ok());
                assert_eq!(ctx.commands().len(), 1);
            }
            ActorExit::Crashed { reason } => panic!("unexpected crash: {reason}"),
        }
        assert_eq!(actor.call_count(), 1);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let dir = tempfile::tempdir().unwrap();
        let actor = Arc::new(MockActor::new(ActorMetadata::new("a")).panicking("disk on fire"));

        match TaskRunner.run(actor, context(&dir).await).await {
            ActorExit::Crashed { reason } => assert!(reason.contains("disk on fire")),
            ActorExit::Finished { .. } => panic!("panic should not finish"),
        }
    }
}
