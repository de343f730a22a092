//! `RunContext` — the explicit per-invocation context handed to an actor.
//!
//! It carries the execution id, actor, phase and host every bus write is
//! attributed to, restricts the actor to the message types it declared
//! (directly or through capabilities), and collects the errors and commands
//! the actor raised so the engine can apply the phase policy afterwards.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, warn};

use db::{MessageBus, MessageRow, Origin, Severity};

use crate::{ActorError, Message, MessageType};

/// An error an actor reported during one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedError {
    pub message: String,
    pub severity: Severity,
    pub details: Value,
}

/// Requests an actor can make of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorCommand {
    /// Restart the host after the current phase, if the phase allows it.
    RequestRestart,
    /// Stop the workflow cleanly once the current phase is done.
    StopAfterPhase,
}

pub struct RunContext {
    bus: MessageBus,
    origin: Origin,
    consumes: BTreeSet<String>,
    produces: BTreeSet<String>,
    reported: Vec<ReportedError>,
    commands: Vec<ActorCommand>,
}

impl RunContext {
    /// `consumes` / `produces` are the actor's fully resolved declarations.
    pub fn new<'a>(
        bus: MessageBus,
        origin: Origin,
        consumes: impl IntoIterator<Item = &'a MessageType>,
        produces: impl IntoIterator<Item = &'a MessageType>,
    ) -> Self {
        Self {
            bus,
            origin,
            consumes: consumes.into_iter().map(|t| t.name.clone()).collect(),
            produces: produces.into_iter().map(|t| t.name.clone()).collect(),
            reported: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn execution(&self) -> &str {
        &self.origin.execution
    }

    pub fn actor(&self) -> &str {
        &self.origin.actor
    }

    pub fn phase(&self) -> &str {
        &self.origin.phase
    }

    pub fn hostname(&self) -> &str {
        &self.origin.hostname
    }

    /// Messages of `types` visible in this execution, oldest first.  Every
    /// requested type must be one the actor declared it consumes.
    pub async fn consume(&self, types: &[MessageType]) -> Result<Vec<MessageRow>, ActorError> {
        let mut names = Vec::with_capacity(types.len());
        for msg_type in types {
            if !self.consumes.contains(&msg_type.name) {
                return Err(ActorError::UndeclaredConsume {
                    actor: self.origin.actor.clone(),
                    msg_type: msg_type.name.clone(),
                });
            }
            names.push(msg_type.name.clone());
        }
        Ok(self.bus.consume(&self.origin.execution, &names).await?)
    }

    /// Every message of every type the actor consumes.
    pub async fn consume_all(&self) -> Result<Vec<MessageRow>, ActorError> {
        let names: Vec<String> = self.consumes.iter().cloned().collect();
        Ok(self.bus.consume(&self.origin.execution, &names).await?)
    }

    /// Commit `message` to the bus.  The write is durable when this returns.
    pub async fn produce(&mut self, message: Message) -> Result<i64, ActorError> {
        if !self.produces.contains(&message.msg_type.name) {
            return Err(ActorError::UndeclaredProduce {
                actor: self.origin.actor.clone(),
                msg_type: message.msg_type.name,
            });
        }
        let id = self
            .bus
            .produce(
                &self.origin,
                &message.msg_type.topic,
                &message.msg_type.name,
                &message.payload,
            )
            .await?;
        debug!(actor = %self.origin.actor, msg_type = %message.msg_type, "produced");
        Ok(id)
    }

    /// Record an error.  Fatal and error severities trigger the phase's error
    /// policy once the actor returns; warnings are only recorded.
    pub async fn report_error(
        &mut self,
        message: impl Into<String>,
        severity: Severity,
        details: Value,
    ) -> Result<(), ActorError> {
        let message = message.into();
        self.bus
            .report_error(&self.origin, &message, severity, &details)
            .await?;
        warn!(actor = %self.origin.actor, %severity, "{message}");
        self.reported.push(ReportedError {
            message,
            severity,
            details,
        });
        Ok(())
    }

    pub fn request_restart(&mut self) {
        self.commands.push(ActorCommand::RequestRestart);
    }

    pub fn request_stop_after_phase(&mut self) {
        self.commands.push(ActorCommand::StopAfterPhase);
    }

    pub fn reported_errors(&self) -> &[ReportedError] {
        &self.reported
    }

    pub fn commands(&self) -> &[ActorCommand] {
        &self.commands
    }

    /// Whether any report so far should trigger the error policy.
    pub fn has_blocking_error(&self) -> bool {
        self.reported.iter().any(|e| e.severity.is_blocking())
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("origin", &self.origin)
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .field("reported", &self.reported.len())
            .field("commands", &self.commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::StoreConfig;
    use serde_json::json;
    use tempfile::TempDir;

    async fn context(consumes: &[MessageType], produces: &[MessageType]) -> (TempDir, RunContext) {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::open(&StoreConfig::in_dir(dir.path())).await.unwrap();
        let origin = Origin::new("exec-1", "host", "scanner", "facts");
        (dir, RunContext::new(bus, origin, consumes, produces))
    }

    #[tokio::test]
    async fn undeclared_types_are_refused() {
        let declared = MessageType::new("Facts", "system");
        let other = MessageType::new("Other", "system");
        let (_dir, mut ctx) = context(&[declared.clone()], &[declared.clone()]).await;

        assert!(matches!(
            ctx.produce(Message::new(other.clone(), json!({}))).await,
            Err(ActorError::UndeclaredProduce { msg_type, .. }) if msg_type == "Other"
        ));
        assert!(matches!(
            ctx.consume(&[other]).await,
            Err(ActorError::UndeclaredConsume { .. })
        ));
    }

    #[tokio::test]
    async fn produced_messages_are_visible_to_consume() {
        let facts = MessageType::new("Facts", "system");
        let (_dir, mut ctx) = context(&[facts.clone()], &[facts.clone()]).await;

        ctx.produce(Message::new(facts.clone(), json!({ "arch": "x86_64" })))
            .await
            .unwrap();

        let rows = ctx.consume(&[facts]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].actor, "scanner");
        assert_eq!(ctx.consume_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn warnings_do_not_block() {
        let (_dir, mut ctx) = context(&[], &[]).await;

        ctx.report_error("slow mirror", Severity::Warning, json!(null)).await.unwrap();
        assert!(!ctx.has_blocking_error());

        ctx.report_error("no space", Severity::Error, json!(null)).await.unwrap();
        assert!(ctx.has_blocking_error());
        assert_eq!(ctx.reported_errors().len(), 2);
    }
}
