//! Resume planning.
//!
//! Re-derives, from the audit log of earlier attempts, what a new run with
//! the same execution id may skip.  A phase with a `phase-complete` or
//! `phase-skipped` row is skipped outright.  A phase that recorded a
//! blocking error re-enters at the granularity its retry policy asks for.
//! Any other phase skips the actors that already checkpointed in it.
//!
//! Only what happened since the latest `phase-entered` row of a phase
//! counts: entering a phase retires its earlier errors and resets its
//! checkpoints to the actors that entry already treated as done.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use db::{AuditEvent, AuditRow, DbError, ErrorRecord};

use crate::models::Phase;
use crate::policy::{ErrorPolicy, RetryPolicy};
use crate::EngineError;

/// The audit events a plan is built from.
pub const PLAN_EVENTS: [AuditEvent; 5] = [
    AuditEvent::PhaseEntered,
    AuditEvent::Checkpoint,
    AuditEvent::PhaseComplete,
    AuditEvent::PhaseSkipped,
    AuditEvent::Error,
];

/// Body of a `phase-entered` audit row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    #[serde(default)]
    pub completed_actors: BTreeSet<String>,
}

/// How a run enters one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEntry {
    /// Everything in the phase already happened.
    Skip,
    /// Run the phase, leaving out `completed_actors`.
    Run { completed_actors: BTreeSet<String> },
}

impl PhaseEntry {
    pub fn full() -> Self {
        Self::Run {
            completed_actors: BTreeSet::new(),
        }
    }

    pub fn is_completed(&self, actor: &str) -> bool {
        match self {
            Self::Skip => true,
            Self::Run { completed_actors } => completed_actors.contains(actor),
        }
    }

    /// The `phase-entered` row body recording this entry.
    pub fn record(&self) -> Result<Value, DbError> {
        let completed_actors = match self {
            Self::Skip => BTreeSet::new(),
            Self::Run { completed_actors } => completed_actors.clone(),
        };
        Ok(serde_json::to_value(EntryRecord { completed_actors })?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumePlan {
    completed_phases: BTreeSet<String>,
    checkpointed: BTreeMap<String, BTreeSet<String>>,
    failed_phases: BTreeSet<String>,
}

impl ResumePlan {
    /// A plan for an execution id nobody ran yet.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Build the plan from audit rows of [`PLAN_EVENTS`]; other rows are
    /// ignored.
    pub fn from_audit(rows: &[AuditRow]) -> Result<Self, DbError> {
        let mut plan = Self::default();
        for row in rows {
            match row.event()? {
                AuditEvent::PhaseEntered => {
                    let entry: EntryRecord = match row.data.as_deref() {
                        Some(raw) => serde_json::from_str(raw)?,
                        None => EntryRecord::default(),
                    };
                    plan.failed_phases.remove(&row.phase);
                    plan.checkpointed
                        .insert(row.phase.clone(), entry.completed_actors);
                }
                AuditEvent::Checkpoint => {
                    plan.checkpointed
                        .entry(row.phase.clone())
                        .or_default()
                        .insert(row.actor.clone());
                }
                AuditEvent::PhaseComplete | AuditEvent::PhaseSkipped => {
                    plan.completed_phases.insert(row.phase.clone());
                }
                AuditEvent::Error => {
                    let record = ErrorRecord::try_from(row.clone())?;
                    if record.severity.is_blocking() {
                        plan.failed_phases.insert(record.phase);
                    }
                }
                _ => {}
            }
        }
        Ok(plan)
    }

    pub fn is_fresh(&self) -> bool {
        self.completed_phases.is_empty()
            && self.checkpointed.is_empty()
            && self.failed_phases.is_empty()
    }

    /// # Errors
    /// [`EngineError::RetryDisabled`] when `phase` failed earlier and its
    /// retry policy forbids re-entering it.
    pub fn entry_for(&self, phase: &Phase) -> Result<PhaseEntry, EngineError> {
        if self.completed_phases.contains(&phase.name) {
            return Ok(PhaseEntry::Skip);
        }

        let checkpointed = || {
            self.checkpointed
                .get(&phase.name)
                .cloned()
                .unwrap_or_default()
        };

        let failed = self.failed_phases.contains(&phase.name)
            && phase.policy.error != ErrorPolicy::ReportOnly;
        if !failed {
            return Ok(PhaseEntry::Run {
                completed_actors: checkpointed(),
            });
        }

        match phase.policy.retry {
            RetryPolicy::RetryPhase => Ok(PhaseEntry::full()),
            RetryPolicy::RetryActor => Ok(PhaseEntry::Run {
                completed_actors: checkpointed(),
            }),
            RetryPolicy::Disabled => Err(EngineError::RetryDisabled {
                phase: phase.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use crate::policy::{PhaseFlags, Policy};
    use crate::stage::StagePosition;
    use db::{MessageBus, Origin, Severity, StoreConfig};
    use serde_json::json;

    fn phase(name: &str, policy: Policy) -> Phase {
        let stage = |position| Stage {
            position,
            actors: Vec::new(),
            initial: Default::default(),
            consumes: Default::default(),
            produces: Default::default(),
        };
        Phase {
            name: name.to_string(),
            tag: name.to_lowercase(),
            policy,
            flags: PhaseFlags::default(),
            stages: [
                stage(StagePosition::Before),
                stage(StagePosition::Main),
                stage(StagePosition::After),
            ],
        }
    }

    async fn plan(bus: &MessageBus) -> ResumePlan {
        let rows = bus.audit_log("exec", &PLAN_EVENTS).await.unwrap();
        ResumePlan::from_audit(&rows).unwrap()
    }

    async fn open() -> (tempfile::TempDir, MessageBus) {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::open(&StoreConfig::in_dir(dir.path())).await.unwrap();
        (dir, bus)
    }

    #[tokio::test]
    async fn completed_phases_are_skipped_and_checkpoints_kept() {
        let (_dir, bus) = open().await;
        let facts = Origin::new("exec", "h", "workflow", "Facts");
        bus.record(&facts, AuditEvent::PhaseComplete, None).await.unwrap();
        bus.checkpoint(&Origin::new("exec", "h", "scan", "Checks")).await.unwrap();

        let plan = plan(&bus).await;
        assert!(!plan.is_fresh());
        assert_eq!(plan.entry_for(&phase("Facts", Policy::default())).unwrap(), PhaseEntry::Skip);

        let checks = plan.entry_for(&phase("Checks", Policy::default())).unwrap();
        assert!(checks.is_completed("scan"));
        assert!(!checks.is_completed("report"));
    }

    #[tokio::test]
    async fn failed_phase_follows_its_retry_policy() {
        let (_dir, bus) = open().await;
        bus.checkpoint(&Origin::new("exec", "h", "scan", "Checks")).await.unwrap();
        bus.report_error(
            &Origin::new("exec", "h", "verify", "Checks"),
            "unsupported driver",
            Severity::Fatal,
            &json!(null),
        )
        .await
        .unwrap();
        let plan = plan(&bus).await;

        let retry_phase = Policy::new(ErrorPolicy::FailPhase, RetryPolicy::RetryPhase);
        assert_eq!(
            plan.entry_for(&phase("Checks", retry_phase)).unwrap(),
            PhaseEntry::full()
        );

        let retry_actor = Policy::new(ErrorPolicy::FailPhase, RetryPolicy::RetryActor);
        assert!(plan
            .entry_for(&phase("Checks", retry_actor))
            .unwrap()
            .is_completed("scan"));

        let disabled = Policy::new(ErrorPolicy::FailImmediately, RetryPolicy::Disabled);
        assert!(matches!(
            plan.entry_for(&phase("Checks", disabled)),
            Err(EngineError::RetryDisabled { phase }) if phase == "Checks"
        ));

        let report_only = Policy::new(ErrorPolicy::ReportOnly, RetryPolicy::Disabled);
        assert!(plan.entry_for(&phase("Checks", report_only)).is_ok());
    }

    #[tokio::test]
    async fn entering_a_phase_retires_its_earlier_attempt() {
        let (_dir, bus) = open().await;
        let checks = Origin::new("exec", "h", "workflow", "Checks");
        let full = PhaseEntry::full().record().unwrap();
        bus.record(&checks, AuditEvent::PhaseEntered, Some(&full)).await.unwrap();
        bus.checkpoint(&Origin::new("exec", "h", "scan", "Checks")).await.unwrap();
        bus.report_error(
            &Origin::new("exec", "h", "verify", "Checks"),
            "unsupported driver",
            Severity::Fatal,
            &json!(null),
        )
        .await
        .unwrap();

        // The retry re-entered the phase from scratch and got past `verify`.
        bus.record(&checks, AuditEvent::PhaseEntered, Some(&full)).await.unwrap();
        bus.checkpoint(&Origin::new("exec", "h", "verify", "Checks")).await.unwrap();

        let retry_phase = Policy::new(ErrorPolicy::FailPhase, RetryPolicy::RetryPhase);
        let entry = plan(&bus).await.entry_for(&phase("Checks", retry_phase)).unwrap();
        assert!(entry.is_completed("verify"));
        assert!(!entry.is_completed("scan"));

        let skipped = Origin::new("exec", "h", "workflow", "Facts");
        bus.record(&skipped, AuditEvent::PhaseSkipped, None).await.unwrap();
        assert_eq!(
            plan(&bus).await.entry_for(&phase("Facts", Policy::default())).unwrap(),
            PhaseEntry::Skip
        );
    }

    #[tokio::test]
    async fn warnings_do_not_mark_a_phase_failed() {
        let (_dir, bus) = open().await;
        bus.report_error(
            &Origin::new("exec", "h", "scan", "Checks"),
            "mirror is slow",
            Severity::Warning,
            &json!(null),
        )
        .await
        .unwrap();

        let disabled = Policy::new(ErrorPolicy::FailPhase, RetryPolicy::Disabled);
        assert!(plan(&bus).await.entry_for(&phase("Checks", disabled)).is_ok());
    }
}
