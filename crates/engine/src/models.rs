//! Workflow domain models.
//!
//! A [`WorkflowDecl`] is the ordered declaration of phases handed over by
//! the loader.  [`Workflow::new`] turns it into immutable [`Phase`]s whose
//! three [`Stage`]s are already filtered and scheduled.  These declaration
//! types serialise, so a workflow can also be described in JSON.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use actors::MessageType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::schedule;
use crate::policy::{PhaseFlags, Policy};
use crate::registry::ActorRegistry;
use crate::stage::{StageFilter, StagePosition};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// One phase as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDecl {
    pub name: String,
    /// Primary tag selecting the phase's actors.
    pub tag: String,
    /// Additional tags every selected actor must also carry.
    #[serde(default)]
    pub extra_tags: Vec<String>,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub flags: PhaseFlags,
}

impl PhaseDecl {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            extra_tags: Vec::new(),
            policy: Policy::default(),
            flags: PhaseFlags::default(),
        }
    }

    pub fn extra_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.extra_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn flags(mut self, flags: PhaseFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// A workflow as declared: an ordered list of phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDecl {
    pub name: String,
    /// Workflow-wide tags added to every phase's extra tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub phases: Vec<PhaseDecl>,
}

impl WorkflowDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            phases: Vec::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn phase(mut self, phase: PhaseDecl) -> Self {
        self.phases.push(phase);
        self
    }
}

// ---------------------------------------------------------------------------
// Stage / Phase / Workflow
// ---------------------------------------------------------------------------

/// One scheduled slice of a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub position: StagePosition,
    /// Actor names in execution order.
    pub actors: Vec<String>,
    /// Consumed types no actor in the stage produces.
    pub initial: BTreeSet<MessageType>,
    pub consumes: BTreeSet<MessageType>,
    pub produces: BTreeSet<MessageType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub tag: String,
    pub policy: Policy,
    pub flags: PhaseFlags,
    /// Before, main and after, in that order.
    pub stages: [Stage; 3],
}

impl Phase {
    pub fn stage(&self, position: StagePosition) -> &Stage {
        match position {
            StagePosition::Before => &self.stages[0],
            StagePosition::Main => &self.stages[1],
            StagePosition::After => &self.stages[2],
        }
    }

    /// Whether `actor` runs anywhere in this phase.
    pub fn contains_actor(&self, actor: &str) -> bool {
        self.stages.iter().any(|s| s.actors.iter().any(|a| a == actor))
    }
}

/// An instantiated workflow.  Immutable once built.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub phases: Vec<Phase>,
    registry: Arc<ActorRegistry>,
}

impl Workflow {
    /// Filter and schedule every stage of every phase.
    ///
    /// # Errors
    /// - [`EngineError::DuplicatePhase`] if two phases share a name.
    /// - [`EngineError::UnknownTag`] if a phase references an unregistered tag.
    /// - [`EngineError::DependencyCycle`] if a stage cannot be ordered.
    pub fn new(decl: WorkflowDecl, registry: Arc<ActorRegistry>) -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        let mut phases = Vec::with_capacity(decl.phases.len());

        for phase in decl.phases {
            if !seen.insert(phase.name.clone()) {
                return Err(EngineError::DuplicatePhase(phase.name));
            }

            let extra: Vec<String> = phase
                .extra_tags
                .iter()
                .chain(decl.tags.iter())
                .cloned()
                .collect();
            let filter = StageFilter::new(registry.tags(), &phase.tag, &extra)?;

            let build = |position: StagePosition| -> Result<Stage, EngineError> {
                let selected = registry.select(&filter.compute(position));
                let scheduled = schedule(&selected).map_err(|e| EngineError::DependencyCycle {
                    phase: phase.name.clone(),
                    stage: position,
                    actors: e.actors,
                })?;
                debug!(
                    phase = %phase.name,
                    stage = %position,
                    order = ?scheduled.order,
                    "stage scheduled"
                );
                Ok(Stage {
                    position,
                    actors: scheduled.order,
                    initial: scheduled.initial,
                    consumes: scheduled.consumes,
                    produces: scheduled.produces,
                })
            };

            let stages = [
                build(StagePosition::Before)?,
                build(StagePosition::Main)?,
                build(StagePosition::After)?,
            ];

            phases.push(Phase {
                name: phase.name,
                tag: phase.tag,
                policy: phase.policy,
                flags: phase.flags,
                stages,
            });
        }

        Ok(Self {
            name: decl.name,
            phases,
            registry,
        })
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Whether `actor` runs in any phase of the workflow.
    pub fn contains_actor(&self, actor: &str) -> bool {
        self.phases.iter().any(|p| p.contains_actor(actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::registry::RegistryBuilder;
    use actors::mock::MockActor;
    use actors::{ActorMetadata, TagRef};

    fn mt(name: &str) -> MessageType {
        MessageType::new(name, "test")
    }

    fn registry() -> Arc<ActorRegistry> {
        let actor = |meta: ActorMetadata| Arc::new(MockActor::new(meta));
        Arc::new(
            RegistryBuilder::new()
                .tag("first")
                .tag("second")
                .tag("ipu")
                .actor(actor(
                    ActorMetadata::new("q")
                        .consumes([mt("M1")])
                        .produces([mt("M2")])
                        .tags([TagRef::main("first"), TagRef::main("ipu")]),
                ))
                .actor(actor(
                    ActorMetadata::new("p")
                        .produces([mt("M1")])
                        .tags([TagRef::main("first"), TagRef::main("ipu")]),
                ))
                .actor(actor(
                    ActorMetadata::new("r")
                        .consumes([mt("M2")])
                        .tags([TagRef::main("second"), TagRef::main("ipu")]),
                ))
                .actor(actor(
                    ActorMetadata::new("other_workflow_only")
                        .tags([TagRef::main("first")]),
                ))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn phases_are_filtered_and_scheduled() {
        let decl = WorkflowDecl::new("upgrade")
            .tag("ipu")
            .phase(PhaseDecl::new("First", "first"))
            .phase(PhaseDecl::new("Second", "second"));
        let workflow = Workflow::new(decl, registry()).unwrap();

        let first = workflow.phase("First").unwrap();
        assert_eq!(first.stage(StagePosition::Main).actors, vec!["p", "q"]);
        assert!(first.stage(StagePosition::Main).initial.is_empty());
        assert!(first.stage(StagePosition::Before).actors.is_empty());

        let second = workflow.phase("Second").unwrap();
        assert_eq!(second.stage(StagePosition::Main).actors, vec!["r"]);
        assert_eq!(
            second.stage(StagePosition::Main).initial,
            [mt("M2")].into_iter().collect()
        );
        assert!(!workflow.contains_actor("other_workflow_only"));
    }

    #[test]
    fn duplicate_phase_names_are_rejected() {
        let decl = WorkflowDecl::new("w")
            .phase(PhaseDecl::new("First", "first"))
            .phase(PhaseDecl::new("First", "second"));
        assert!(matches!(
            Workflow::new(decl, registry()),
            Err(EngineError::DuplicatePhase(name)) if name == "First"
        ));
    }

    #[test]
    fn phase_with_unregistered_tag_fails_at_load() {
        let decl = WorkflowDecl::new("w").phase(PhaseDecl::new("Checks", "checks"));
        assert!(matches!(
            Workflow::new(decl, registry()),
            Err(EngineError::UnknownTag { tag, .. }) if tag == "checks"
        ));
    }

    #[test]
    fn capability_consumers_are_ordered_after_producers() {
        let registry = Arc::new(
            RegistryBuilder::new()
                .tag("checks")
                .capability(Capability::new("rpm").consumes([mt("RepoList")]))
                .actor(Arc::new(MockActor::new(
                    ActorMetadata::new("c")
                        .capabilities(["rpm"])
                        .tags([TagRef::main("checks")]),
                )))
                .actor(Arc::new(MockActor::new(
                    ActorMetadata::new("p")
                        .produces([mt("RepoList")])
                        .tags([TagRef::main("checks")]),
                )))
                .build()
                .unwrap(),
        );
        let decl = WorkflowDecl::new("w").phase(PhaseDecl::new("Checks", "checks"));
        let workflow = Workflow::new(decl, registry).unwrap();

        let main = workflow.phase("Checks").unwrap().stage(StagePosition::Main);
        assert_eq!(main.actors, vec!["p", "c"]);
        assert!(main.initial.is_empty());
    }

    #[test]
    fn cyclic_stage_fails_with_stage_context() {
        let registry = Arc::new(
            RegistryBuilder::new()
                .tag("t")
                .actor(Arc::new(MockActor::new(
                    ActorMetadata::new("a")
                        .consumes([mt("B")])
                        .produces([mt("A")])
                        .tags([TagRef::after("t")]),
                )))
                .actor(Arc::new(MockActor::new(
                    ActorMetadata::new("b")
                        .consumes([mt("A")])
                        .produces([mt("B")])
                        .tags([TagRef::after("t")]),
                )))
                .build()
                .unwrap(),
        );
        let decl = WorkflowDecl::new("w").phase(PhaseDecl::new("Loop", "t"));
        match Workflow::new(decl, registry) {
            Err(EngineError::DependencyCycle { phase, stage, actors }) => {
                assert_eq!(phase, "Loop");
                assert_eq!(stage, StagePosition::After);
                assert_eq!(actors, vec!["a", "b"]);
            }
            other => panic!("expected a dependency cycle, got {other:?}"),
        }
    }
}
