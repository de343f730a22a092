//! `MockActor` — a test double for `Actor`.
//!
//! Useful in unit and integration tests where a real actor implementation is
//! either unavailable or irrelevant.  Each invocation reads every message the
//! actor declared it consumes, records what it saw, then plays back its
//! scripted steps in order.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Actor, ActorError, ActorMetadata, Message, RunContext, Severity};

/// One scripted action of a `MockActor`.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Produce the message.
    Produce(Message),
    /// Report an error of the given severity and keep going.
    Report(String, Severity),
    /// Return `ActorError::Failed`.
    Fail(String),
    /// Panic inside `process`.
    Panic(String),
    /// Ask for a restart after the current phase.
    RequestRestart,
    /// Ask the workflow to stop after the current phase.
    StopAfterPhase,
}

/// What one invocation observed.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub execution: String,
    pub hostname: String,
    pub phase: String,
    /// `(message type, payload)` for every consumed message.
    pub observed: Vec<(String, Value)>,
}

/// A mock actor that records every call it receives and plays back a
/// programmer-specified script.
pub struct MockActor {
    metadata: ActorMetadata,
    steps: Vec<MockStep>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockActor {
    /// A mock that consumes its inputs and does nothing else.
    pub fn new(metadata: ActorMetadata) -> Self {
        Self {
            metadata,
            steps: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn step(mut self, step: MockStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Produce `payload` as the actor's declared type `type_name`.
    ///
    /// Falls back to an undeclared type of that name, which the run context
    /// rejects; useful for contract-violation tests.
    pub fn producing(self, type_name: &str, payload: Value) -> Self {
        let msg_type = self
            .metadata
            .produces
            .iter()
            .find(|t| t.name == type_name)
            .cloned()
            .unwrap_or_else(|| crate::MessageType::new(type_name, "undeclared"));
        self.step(MockStep::Produce(Message::new(msg_type, payload)))
    }

    pub fn reporting(self, message: impl Into<String>, severity: Severity) -> Self {
        self.step(MockStep::Report(message.into(), severity))
    }

    pub fn failing(self, message: impl Into<String>) -> Self {
        self.step(MockStep::Fail(message.into()))
    }

    pub fn panicking(self, message: impl Into<String>) -> Self {
        self.step(MockStep::Panic(message.into()))
    }

    pub fn requesting_restart(self) -> Self {
        self.step(MockStep::RequestRestart)
    }

    pub fn stopping_after_phase(self) -> Self {
        self.step(MockStep::StopAfterPhase)
    }

    fn calls(&self) -> MutexGuard<'_, Vec<MockCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of times this actor has been executed.
    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Every invocation so far, in call order.
    pub fn recorded_calls(&self) -> Vec<MockCall> {
        self.calls().clone()
    }
}

#[async_trait]
impl Actor for MockActor {
    fn metadata(&self) -> &ActorMetadata {
        &self.metadata
    }

    async fn process(&self, ctx: &mut RunContext) -> Result<(), ActorError> {
        let observed = ctx
            .consume_all()
            .await?
            .into_iter()
            .map(|row| {
                let payload = row.payload().unwrap_or(Value::Null);
                (row.msg_type, payload)
            })
            .collect();

        self.calls().push(MockCall {
            execution: ctx.execution().to_string(),
            hostname: ctx.hostname().to_string(),
            phase: ctx.phase().to_string(),
            observed,
        });

        for step in &self.steps {
            match step {
                MockStep::Produce(message) => {
                    ctx.produce(message.clone()).await?;
                }
                MockStep::Report(message, severity) => {
                    ctx.report_error(message.clone(), *severity, Value::Null).await?;
                }
                MockStep::Fail(message) => return Err(ActorError::Failed(message.clone())),
                MockStep::Panic(message) => panic!("{message}"),
                MockStep::RequestRestart => ctx.request_restart(),
                MockStep::StopAfterPhase => ctx.request_stop_after_phase(),
            }
        }
        Ok(())
    }
}
