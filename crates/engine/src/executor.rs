//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the run options against the workflow and takes the
//!    per-execution run lock.
//! 2. Derives a resume plan from the audit log of earlier attempts with the
//!    same execution id.
//! 3. Walks phases in order, each phase over its before/main/after stages,
//!    each stage over its scheduled actors, one actor at a time.
//! 4. Hands every actor to the `ActorRunner` and applies the phase's error
//!    policy to what comes back.
//! 5. Records actor checkpoints, phase boundaries and restart requests in
//!    the audit log so a later run can pick up where this one stopped.
//!
//! Progress of the run in flight is published on a watch channel, see
//! [`WorkflowExecutor::progress`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use actors::{ActorCommand, ActorError, RunContext, Severity};
use db::bus::WORKFLOW_SOURCE;
use db::{
    AuditEvent, AuditRow, DbError, ErrorRecord, ExecutionLock, ExecutionRow, MessageBus, Origin,
    StoreConfig,
};

use crate::models::{Phase, Stage, Workflow};
use crate::policy::ErrorPolicy;
use crate::registry::RegisteredActor;
use crate::resume::{PhaseEntry, ResumePlan, PLAN_EVENTS};
use crate::runner::{ActorExit, ActorRunner, TaskRunner};
use crate::stage::StagePosition;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings shared by every run of one executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Host every record is attributed to.
    pub hostname: String,
    /// Recorded as the `kind` of new execution rows.
    pub kind: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let hostname = std::fs::read_to_string("/etc/hostname")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            hostname,
            kind: "upgrade".to_string(),
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Execution id to run under.  A fresh UUID when absent; an id with
    /// earlier attempts resumes them.
    pub execution: Option<String>,
    /// `Phase` or `Phase.before` / `Phase.main` / `Phase.after`.
    pub until_phase: Option<String>,
    /// Stop right after this actor.
    pub until_actor: Option<String>,
    /// Skip every phase up to and including this one.
    pub skip_phases_until: Option<String>,
    /// Stored with the execution row.
    #[serde(default)]
    pub configuration: Value,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution(mut self, id: impl Into<String>) -> Self {
        self.execution = Some(id.into());
        self
    }

    pub fn until_phase(mut self, target: impl Into<String>) -> Self {
        self.until_phase = Some(target.into());
        self
    }

    pub fn until_actor(mut self, actor: impl Into<String>) -> Self {
        self.until_actor = Some(actor.into());
        self
    }

    pub fn skip_phases_until(mut self, phase: impl Into<String>) -> Self {
        self.skip_phases_until = Some(phase.into());
        self
    }

    pub fn configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }
}

/// Where a run halts early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTarget {
    /// After the whole phase.
    Phase(String),
    /// After one stage of a phase.
    Stage(String, StagePosition),
    /// After the actor finishes.
    Actor(String),
}

impl StopTarget {
    /// Parse an `until_phase` value.  A trailing `.before` / `.main` /
    /// `.after` selects a stage when the rest names a phase.
    fn parse_phase(workflow: &Workflow, target: &str) -> Result<Self, EngineError> {
        if workflow.phase(target).is_some() {
            return Ok(Self::Phase(target.to_string()));
        }
        if let Some((phase, stage)) = target.rsplit_once('.') {
            if workflow.phase(phase).is_none() {
                return Err(EngineError::UnknownPhase(phase.to_string()));
            }
            let position = stage
                .parse::<StagePosition>()
                .map_err(|_| EngineError::InvalidStopTarget(target.to_string()))?;
            return Ok(Self::Stage(phase.to_string(), position));
        }
        Err(EngineError::UnknownPhase(target.to_string()))
    }

    fn phase_name(&self) -> Option<&str> {
        match self {
            Self::Phase(phase) | Self::Stage(phase, _) => Some(phase),
            Self::Actor(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Why a run stopped before the last phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    UntilPhase,
    UntilStage,
    UntilActor(String),
    /// An actor asked the workflow to stop after its phase.
    ActorRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running {
        phase: String,
        stage: StagePosition,
        actor_index: usize,
    },
    Completed,
    StoppedEarly {
        phase: String,
        reason: StopReason,
    },
    /// The host should restart; resuming the execution continues after
    /// `phase`.
    RestartRequested {
        phase: String,
    },
    Failed {
        phase: String,
        policy: ErrorPolicy,
    },
}

/// The result of one run or resume attempt.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub execution: String,
    pub state: RunState,
    /// Every error recorded under the execution id, earlier attempts
    /// included.
    pub errors: Vec<ErrorRecord>,
}

impl RunOutcome {
    /// 0 unless a FailImmediately or FailPhase policy halted the run.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::Failed { .. } => 1,
            _ => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, RunState::Failed { .. })
    }
}

/// Everything recorded for one execution id.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution: String,
    pub attempts: Vec<ExecutionRow>,
    /// Actor checkpoints and phase boundaries, in execution order.
    pub checkpoints: Vec<AuditRow>,
    pub errors: Vec<ErrorRecord>,
    pub messages: usize,
}

/// What the engine keeps of one actor invocation.
struct ActorOutcome {
    blocking: bool,
    commands: Vec<ActorCommand>,
}

/// Decision after a phase's stages ran.
enum PhaseEnd {
    Continue,
    Halt(RunState),
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Drives runs of one workflow against one message bus.
pub struct WorkflowExecutor {
    bus: MessageBus,
    workflow: Workflow,
    runner: Arc<dyn ActorRunner>,
    config: ExecutorConfig,
    lock_dir: PathBuf,
    progress: watch::Sender<RunState>,
}

impl WorkflowExecutor {
    pub fn new(
        bus: MessageBus,
        workflow: Workflow,
        config: ExecutorConfig,
        lock_dir: impl Into<PathBuf>,
    ) -> Self {
        let (progress, _) = watch::channel(RunState::NotStarted);
        Self {
            bus,
            workflow,
            runner: Arc::new(TaskRunner),
            config,
            lock_dir: lock_dir.into(),
            progress,
        }
    }

    /// Open the store described by `store` and build an executor on it.
    pub async fn open(
        store: &StoreConfig,
        workflow: Workflow,
        config: ExecutorConfig,
    ) -> Result<Self, EngineError> {
        let bus = MessageBus::open(store).await?;
        Ok(Self::new(bus, workflow, config, store.lock_dir.clone()))
    }

    /// Replace the default [`TaskRunner`].
    pub fn with_runner(mut self, runner: Arc<dyn ActorRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Follow the state of the current run: `Running` names the actor being
    /// invoked, and the final state is published when the run ends.
    pub fn progress(&self) -> watch::Receiver<RunState> {
        self.progress.subscribe()
    }

    /// Run the workflow.
    ///
    /// # Errors
    /// Returns `EngineError` for invalid run options, a held run lock, a
    /// retry-disabled phase that failed earlier, or storage failures.
    /// Actor errors are not `Err`: they end up in the returned outcome.
    #[instrument(skip(self, options), fields(workflow = %self.workflow.name))]
    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome, EngineError> {
        let kind = self.config.kind.clone();
        self.execute(options, &kind).await
    }

    /// Continue `execution` with the kind and configuration of its last
    /// attempt.
    #[instrument(skip(self), fields(workflow = %self.workflow.name))]
    pub async fn resume(&self, execution: &str) -> Result<RunOutcome, EngineError> {
        let attempts = self.bus.executions_for(execution).await?;
        let last = attempts
            .last()
            .ok_or_else(|| EngineError::UnknownExecution(execution.to_string()))?;
        let configuration: Value =
            serde_json::from_str(&last.configuration).map_err(DbError::from)?;

        info!(execution, attempts = attempts.len(), "resuming execution");
        let options = RunOptions::new()
            .execution(execution)
            .configuration(configuration);
        self.execute(options, &last.kind).await
    }

    pub async fn list_executions(&self) -> Result<Vec<ExecutionRow>, EngineError> {
        Ok(self.bus.list_executions().await?)
    }

    /// Attempts, checkpoints, errors and message count of `execution`.
    pub async fn report(&self, execution: &str) -> Result<ExecutionReport, EngineError> {
        report(&self.bus, execution).await
    }

    // -----------------------------------------------------------------------
    // Internal: one attempt
    // -----------------------------------------------------------------------

    async fn execute(&self, options: RunOptions, kind: &str) -> Result<RunOutcome, EngineError> {
        // ------------------------------------------------------------------
        // Validate options before touching the store.
        // ------------------------------------------------------------------
        let until_phase = options
            .until_phase
            .as_deref()
            .map(|target| StopTarget::parse_phase(&self.workflow, target))
            .transpose()?;
        let until_actor = match options.until_actor.as_deref() {
            Some(actor) if self.workflow.contains_actor(actor) => {
                Some(StopTarget::Actor(actor.to_string()))
            }
            Some(actor) => return Err(EngineError::InvalidStopTarget(actor.to_string())),
            None => None,
        };
        let skip_until = match options.skip_phases_until.as_deref() {
            Some(name) => Some(self.phase_index(name)?),
            None => None,
        };
        if let (Some(skip), Some(target)) = (skip_until, until_phase.as_ref()) {
            let target_phase = target.phase_name().unwrap_or_default();
            if self.phase_index(target_phase)? <= skip {
                return Err(EngineError::InvalidStopTarget(target_phase.to_string()));
            }
        }

        // ------------------------------------------------------------------
        // Lock, then plan from earlier attempts.
        // ------------------------------------------------------------------
        let execution = options
            .execution
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let lock = ExecutionLock::acquire(&self.lock_dir, &execution).map_err(|e| match e {
            DbError::Locked { execution } => EngineError::ExecutionLocked(execution),
            other => EngineError::Database(other),
        })?;
        debug!(path = %lock.path().display(), "run lock held");

        let plan = if self.bus.executions_for(&execution).await?.is_empty() {
            ResumePlan::fresh()
        } else {
            let rows = self.bus.audit_log(&execution, &PLAN_EVENTS).await?;
            ResumePlan::from_audit(&rows)?
        };
        let entries = self
            .workflow
            .phases
            .iter()
            .map(|phase| plan.entry_for(phase))
            .collect::<Result<Vec<_>, _>>()?;

        let row = self
            .bus
            .create_execution(&execution, kind, &options.configuration)
            .await?;
        info!(
            execution = %execution,
            attempt = row.id,
            resumed = !plan.is_fresh(),
            "execution started"
        );

        // ------------------------------------------------------------------
        // Walk the phases.
        // ------------------------------------------------------------------
        self.progress.send_replace(RunState::NotStarted);
        let mut state = RunState::Completed;
        for (index, (phase, entry)) in self.workflow.phases.iter().zip(&entries).enumerate() {
            if *entry == PhaseEntry::Skip {
                info!(phase = %phase.name, "phase completed in an earlier attempt");
                continue;
            }
            if skip_until.is_some_and(|skip| index <= skip) {
                warn!(phase = %phase.name, "skipping phase on request");
                let origin = self.phase_origin(&execution, &phase.name);
                self.bus
                    .record(&origin, AuditEvent::PhaseSkipped, None)
                    .await?;
                continue;
            }

            let end = self
                .run_phase(
                    &execution,
                    phase,
                    entry,
                    until_phase.as_ref(),
                    until_actor.as_ref(),
                )
                .await?;
            if let PhaseEnd::Halt(halted) = end {
                state = halted;
                break;
            }
        }
        self.progress.send_replace(state.clone());
        match &state {
            RunState::Failed { phase, policy } => {
                error!(execution = %execution, %phase, ?policy, "execution failed")
            }
            other => info!(execution = %execution, state = ?other, "execution finished"),
        }

        let errors = self.bus.errors(&execution).await?;
        Ok(RunOutcome {
            execution,
            state,
            errors,
        })
    }

    #[instrument(skip_all, fields(phase = %phase.name))]
    async fn run_phase(
        &self,
        execution: &str,
        phase: &Phase,
        entry: &PhaseEntry,
        until_phase: Option<&StopTarget>,
        until_actor: Option<&StopTarget>,
    ) -> Result<PhaseEnd, EngineError> {
        let origin = self.phase_origin(execution, &phase.name);
        info!("entering phase");
        self.bus
            .record(&origin, AuditEvent::PhaseEntered, Some(&entry.record()?))
            .await?;
        if phase.flags.is_checkpoint {
            self.bus
                .record(
                    &origin,
                    AuditEvent::PhaseCheckpoint,
                    Some(&json!({ "phase": phase.name })),
                )
                .await?;
        }

        let mut phase_failed = false;
        let mut restart = false;
        let mut stop = false;

        for stage in &phase.stages {
            for (actor_index, actor_name) in stage.actors.iter().enumerate() {
                if entry.is_completed(actor_name) {
                    debug!(actor = %actor_name, "actor completed in an earlier attempt");
                } else {
                    self.progress.send_replace(RunState::Running {
                        phase: phase.name.clone(),
                        stage: stage.position,
                        actor_index,
                    });
                    let Some(registered) = self.workflow.registry().get(actor_name) else {
                        warn!(actor = %actor_name, "scheduled actor missing from registry");
                        continue;
                    };

                    let outcome = self.run_actor(execution, phase, stage, registered).await?;
                    for command in &outcome.commands {
                        match command {
                            ActorCommand::RequestRestart => restart = true,
                            ActorCommand::StopAfterPhase => stop = true,
                        }
                    }

                    if outcome.blocking {
                        match phase.policy.error {
                            ErrorPolicy::FailImmediately => {
                                error!(actor = %actor_name, "aborting workflow");
                                return Ok(PhaseEnd::Halt(RunState::Failed {
                                    phase: phase.name.clone(),
                                    policy: ErrorPolicy::FailImmediately,
                                }));
                            }
                            ErrorPolicy::FailPhase => {
                                warn!(
                                    actor = %actor_name,
                                    "phase marked failed; finishing its stages"
                                );
                                phase_failed = true;
                            }
                            ErrorPolicy::ReportOnly => {
                                warn!(actor = %actor_name, "error recorded, continuing");
                            }
                        }
                    }
                }

                if matches!(until_actor, Some(StopTarget::Actor(target)) if target == actor_name) {
                    return Ok(PhaseEnd::Halt(self.stopped(
                        phase,
                        phase_failed,
                        StopReason::UntilActor(actor_name.clone()),
                    )));
                }
            }

            if matches!(
                until_phase,
                Some(StopTarget::Stage(target, position))
                    if *target == phase.name && *position == stage.position
            ) {
                let state = self.stopped(phase, phase_failed, StopReason::UntilStage);
                return Ok(PhaseEnd::Halt(state));
            }
        }

        if phase_failed {
            return Ok(PhaseEnd::Halt(RunState::Failed {
                phase: phase.name.clone(),
                policy: ErrorPolicy::FailPhase,
            }));
        }

        self.bus.record(&origin, AuditEvent::PhaseComplete, None).await?;
        info!("phase complete");

        let restart_now = phase.flags.restart_after_phase
            || (restart && phase.flags.request_restart_after_phase);
        if restart_now {
            self.bus
                .record(&origin, AuditEvent::RestartRequested, None)
                .await?;
            info!("restart requested after phase");
            return Ok(PhaseEnd::Halt(RunState::RestartRequested {
                phase: phase.name.clone(),
            }));
        }
        if restart {
            warn!("restart request ignored; phase does not allow restarts");
        }

        if stop {
            return Ok(PhaseEnd::Halt(RunState::StoppedEarly {
                phase: phase.name.clone(),
                reason: StopReason::ActorRequest,
            }));
        }
        if matches!(until_phase, Some(StopTarget::Phase(target)) if *target == phase.name) {
            return Ok(PhaseEnd::Halt(RunState::StoppedEarly {
                phase: phase.name.clone(),
                reason: StopReason::UntilPhase,
            }));
        }
        Ok(PhaseEnd::Continue)
    }

    /// Invoke one actor and persist its checkpoint or its failure.
    async fn run_actor(
        &self,
        execution: &str,
        phase: &Phase,
        stage: &Stage,
        registered: &RegisteredActor,
    ) -> Result<ActorOutcome, EngineError> {
        let origin = Origin::new(
            execution,
            &self.config.hostname,
            registered.name(),
            &phase.name,
        );
        let ctx = RunContext::new(
            self.bus.clone(),
            origin.clone(),
            registered.consumes(),
            registered.produces(),
        );
        info!(actor = %registered.name(), stage = %stage.position, "running actor");

        let exit = self.runner.run(Arc::clone(registered.actor()), ctx).await;
        let (blocking, commands) = match exit {
            ActorExit::Finished { ctx, result: Ok(()) } => {
                (ctx.has_blocking_error(), ctx.commands().to_vec())
            }
            ActorExit::Finished {
                result: Err(ActorError::Bus(e)),
                ..
            } => return Err(EngineError::Database(e)),
            ActorExit::Finished { ctx, result: Err(e) } => {
                error!(actor = %registered.name(), error = %e, "actor failed");
                self.bus
                    .report_error(
                        &origin,
                        &e.to_string(),
                        Severity::Fatal,
                        &json!({ "source": "actor" }),
                    )
                    .await?;
                (true, ctx.commands().to_vec())
            }
            ActorExit::Crashed { reason } => {
                self.bus
                    .report_error(&origin, &reason, Severity::Fatal, &json!({ "source": "runner" }))
                    .await?;
                (true, Vec::new())
            }
        };

        if !blocking || phase.policy.error == ErrorPolicy::ReportOnly {
            self.bus.checkpoint(&origin).await?;
        }
        Ok(ActorOutcome { blocking, commands })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn phase_index(&self, name: &str) -> Result<usize, EngineError> {
        self.workflow
            .phases
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| EngineError::UnknownPhase(name.to_string()))
    }

    fn phase_origin(&self, execution: &str, phase: &str) -> Origin {
        Origin::new(execution, &self.config.hostname, WORKFLOW_SOURCE, phase)
    }

    /// An early stop inside a failing FailPhase phase still reports failure.
    fn stopped(&self, phase: &Phase, phase_failed: bool, reason: StopReason) -> RunState {
        info!(phase = %phase.name, ?reason, "stopping early");
        if phase_failed {
            RunState::Failed {
                phase: phase.name.clone(),
                policy: ErrorPolicy::FailPhase,
            }
        } else {
            RunState::StoppedEarly {
                phase: phase.name.clone(),
                reason,
            }
        }
    }
}

/// Attempts, checkpoints, errors and message count of `execution`.
///
/// # Errors
/// [`EngineError::UnknownExecution`] if nothing was ever run under the id.
pub async fn report(bus: &MessageBus, execution: &str) -> Result<ExecutionReport, EngineError> {
    let attempts = bus.executions_for(execution).await?;
    if attempts.is_empty() {
        return Err(EngineError::UnknownExecution(execution.to_string()));
    }
    Ok(ExecutionReport {
        execution: execution.to_string(),
        attempts,
        checkpoints: bus.checkpoints(execution).await?,
        errors: bus.errors(execution).await?,
        messages: bus.messages(execution).await?.len(),
    })
}
