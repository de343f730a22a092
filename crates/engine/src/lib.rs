//! `engine` crate — tag model, stage filtering and scheduling, capability
//! resolution, and the phase-by-phase workflow executor.

pub mod capability;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod policy;
pub mod registry;
pub mod resume;
pub mod runner;
pub mod stage;
pub mod tags;

pub use capability::{Capability, CapabilityResolver, Field};
pub use dag::{schedule, CycleError, Schedule};
pub use error::EngineError;
pub use executor::{
    report, ExecutionReport, ExecutorConfig, RunOptions, RunOutcome, RunState, StopReason,
    StopTarget, WorkflowExecutor,
};
pub use models::{Phase, PhaseDecl, Stage, Workflow, WorkflowDecl};
pub use policy::{ErrorPolicy, PhaseFlags, Policy, RetryPolicy};
pub use registry::{ActorRegistry, RegisteredActor, RegistryBuilder};
pub use resume::{EntryRecord, PhaseEntry, ResumePlan};
pub use runner::{ActorExit, ActorRunner, TaskRunner};
pub use stage::{StageFilter, StagePosition};
pub use tags::{Tag, TagSet};
