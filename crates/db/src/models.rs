//! Row structs that map 1-to-1 onto store tables, plus the small enums
//! persisted as text columns.
//!
//! These are *persistence* models — they carry no scheduling behaviour.
//! Domain types live in the `actors` and `engine` crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::DbError;

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Who wrote a record: the data source every message and audit row points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Execution id (the `context` column) scoping the record.
    pub execution: String,
    pub hostname: String,
    pub actor: String,
    pub phase: String,
}

impl Origin {
    pub fn new(
        execution: impl Into<String>,
        hostname: impl Into<String>,
        actor: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            execution: execution.into(),
            hostname: hostname.into(),
            actor: actor.into(),
            phase: phase.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// execution
// ---------------------------------------------------------------------------

/// One run or resume attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRow {
    pub id: i64,
    pub context: String,
    pub kind: String,
    /// Serialised run configuration (JSON text).
    pub configuration: String,
    pub stamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// message
// ---------------------------------------------------------------------------

/// A message joined with its data source and content-addressed payload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub context: String,
    pub stamp: DateTime<Utc>,
    pub topic: String,
    #[sqlx(rename = "type")]
    pub msg_type: String,
    pub actor: String,
    pub phase: String,
    pub hostname: String,
    pub hash: String,
    pub data: String,
}

impl MessageRow {
    /// Decode the stored payload.
    pub fn payload(&self) -> Result<Value, DbError> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

/// Kinds of audit rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEvent {
    /// A message was produced; `message_id` is set.
    NewMessage,
    /// An actor finished without a blocking error.
    Checkpoint,
    /// A phase flagged as a checkpoint was entered.
    PhaseCheckpoint,
    /// A run started (or re-entered) a phase; `data` lists the actors the
    /// entry treated as already done.
    PhaseEntered,
    /// A run skipped the phase on request without executing it.
    PhaseSkipped,
    /// A phase ran to the end without its policy halting the workflow.
    PhaseComplete,
    /// An actor reported an error; `data` holds an [`ErrorData`].
    Error,
    /// The workflow ended after a phase so the host can restart.
    RestartRequested,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "new-message",
            Self::Checkpoint => "checkpoint",
            Self::PhaseCheckpoint => "phase-checkpoint",
            Self::PhaseEntered => "phase-entered",
            Self::PhaseSkipped => "phase-skipped",
            Self::PhaseComplete => "phase-complete",
            Self::Error => "error",
            Self::RestartRequested => "restart-requested",
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditEvent {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new-message"       => Ok(Self::NewMessage),
            "checkpoint"        => Ok(Self::Checkpoint),
            "phase-checkpoint"  => Ok(Self::PhaseCheckpoint),
            "phase-entered"     => Ok(Self::PhaseEntered),
            "phase-skipped"     => Ok(Self::PhaseSkipped),
            "phase-complete"    => Ok(Self::PhaseComplete),
            "error"             => Ok(Self::Error),
            "restart-requested" => Ok(Self::RestartRequested),
            other => Err(DbError::InvalidValue {
                column: "audit.event",
                value: other.to_string(),
            }),
        }
    }
}

/// An audit row joined with its data source.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub context: String,
    pub event: String,
    pub stamp: DateTime<Utc>,
    pub actor: String,
    pub phase: String,
    pub hostname: String,
    pub message_id: Option<i64>,
    pub data: Option<String>,
}

impl AuditRow {
    pub fn event(&self) -> Result<AuditEvent, DbError> {
        self.event.parse()
    }
}

// ---------------------------------------------------------------------------
// errors
// ---------------------------------------------------------------------------

/// Severity of an error reported by an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
}

impl Severity {
    /// Fatal and error reports trigger the phase's error policy; warnings
    /// are only recorded.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Self::Warning)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal   => write!(f, "fatal"),
            Self::Error   => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fatal"   => Ok(Self::Fatal),
            "error"   => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            other => Err(DbError::InvalidValue {
                column: "severity",
                value: other.to_string(),
            }),
        }
    }
}

/// Body of an `error` audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: Value,
}

/// An error report read back from the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub audit_id: i64,
    pub execution: String,
    pub actor: String,
    pub phase: String,
    pub hostname: String,
    pub stamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
    pub details: Value,
}

impl TryFrom<AuditRow> for ErrorRecord {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let raw = row.data.ok_or(DbError::InvalidValue {
            column: "audit.data",
            value: "NULL".to_string(),
        })?;
        let data: ErrorData = serde_json::from_str(&raw)?;
        Ok(Self {
            audit_id: row.id,
            execution: row.context,
            actor: row.actor,
            phase: row.phase,
            hostname: row.hostname,
            stamp: row.stamp,
            message: data.message,
            severity: data.severity,
            details: data.details,
        })
    }
}
