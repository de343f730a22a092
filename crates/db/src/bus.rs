//! `MessageBus` — the persisted, append-only message and audit log.
//!
//! Every write runs in its own transaction and is committed before the call
//! returns, so a reboot between two actors never loses committed state.
//! Reads are strictly scoped to one execution id.  Consumption is broadcast:
//! every consumer sees every message of the requested types.

use serde_json::Value;
use tracing::{debug, instrument};

use crate::models::{
    AuditEvent, AuditRow, ErrorData, ErrorRecord, ExecutionRow, MessageRow, Origin, Severity,
};
use crate::pool::{create_pool, run_migrations};
use crate::repository::{audit, executions, messages, sources};
use crate::{DbError, DbPool, StoreConfig};

/// Actor name recorded for messages injected before a run starts.
pub const WORKFLOW_SOURCE: &str = "workflow";
/// Phase name recorded for messages injected before a run starts.
pub const INIT_PHASE: &str = "init";

#[derive(Debug, Clone)]
pub struct MessageBus {
    pool: DbPool,
}

impl MessageBus {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open the store described by `config` and apply pending migrations.
    pub async fn open(config: &StoreConfig) -> Result<Self, DbError> {
        let pool = create_pool(&config.database_url, config.max_connections).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // executions
    // -----------------------------------------------------------------------

    pub async fn create_execution(
        &self,
        context: &str,
        kind: &str,
        configuration: &Value,
    ) -> Result<ExecutionRow, DbError> {
        let mut conn = self.pool.acquire().await?;
        executions::create_execution(&mut conn, context, kind, configuration).await
    }

    pub async fn list_executions(&self) -> Result<Vec<ExecutionRow>, DbError> {
        executions::list_executions(&self.pool).await
    }

    pub async fn executions_for(&self, context: &str) -> Result<Vec<ExecutionRow>, DbError> {
        executions::executions_for_context(&self.pool, context).await
    }

    // -----------------------------------------------------------------------
    // messages
    // -----------------------------------------------------------------------

    /// Store `payload` under its content hash (once per distinct payload) and
    /// append a message row plus its `new-message` audit row.  Returns the
    /// message id.
    #[instrument(skip(self, payload), fields(execution = %origin.execution, actor = %origin.actor))]
    pub async fn produce(
        &self,
        origin: &Origin,
        topic: &str,
        msg_type: &str,
        payload: &Value,
    ) -> Result<i64, DbError> {
        let (hash, data) = messages::content_address(payload)?;

        let mut tx = self.pool.begin().await?;
        let source = sources::get_or_create_data_source(&mut tx, origin).await?;
        messages::store_message_data(&mut tx, &hash, &data).await?;
        let message_id =
            messages::insert_message(&mut tx, &origin.execution, topic, msg_type, source, &hash)
                .await?;
        audit::insert_audit(
            &mut tx,
            &origin.execution,
            AuditEvent::NewMessage,
            source,
            Some(message_id),
            None,
        )
        .await?;
        tx.commit().await?;

        debug!(message_id, msg_type, hash = %hash, "message committed");
        Ok(message_id)
    }

    /// Feed a message into `execution` before any actor runs, e.g. workflow
    /// configuration or pre-recorded answers.
    pub async fn inject(
        &self,
        execution: &str,
        hostname: &str,
        topic: &str,
        msg_type: &str,
        payload: &Value,
    ) -> Result<i64, DbError> {
        let origin = Origin::new(execution, hostname, WORKFLOW_SOURCE, INIT_PHASE);
        self.produce(&origin, topic, msg_type, payload).await
    }

    /// All messages of `types` within `execution`, oldest first.
    pub async fn consume(
        &self,
        execution: &str,
        types: &[String],
    ) -> Result<Vec<MessageRow>, DbError> {
        messages::fetch_messages(&self.pool, execution, types).await
    }

    pub async fn messages(&self, execution: &str) -> Result<Vec<MessageRow>, DbError> {
        messages::fetch_all_messages(&self.pool, execution).await
    }

    /// Number of distinct payloads in the content-addressed store.
    pub async fn payload_count(&self) -> Result<i64, DbError> {
        messages::count_message_data(&self.pool).await
    }

    // -----------------------------------------------------------------------
    // audit
    // -----------------------------------------------------------------------

    /// Append an audit row of kind `event`, optionally carrying JSON `data`.
    pub async fn record(
        &self,
        origin: &Origin,
        event: AuditEvent,
        data: Option<&Value>,
    ) -> Result<i64, DbError> {
        let data = data.map(serde_json::to_string).transpose()?;

        let mut tx = self.pool.begin().await?;
        let source = sources::get_or_create_data_source(&mut tx, origin).await?;
        let id = audit::insert_audit(
            &mut tx,
            &origin.execution,
            event,
            source,
            None,
            data.as_deref(),
        )
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Record that `origin.actor` finished within `origin.phase`.
    pub async fn checkpoint(&self, origin: &Origin) -> Result<i64, DbError> {
        self.record(origin, AuditEvent::Checkpoint, None).await
    }

    /// Record an error reported by `origin.actor`.
    pub async fn report_error(
        &self,
        origin: &Origin,
        message: &str,
        severity: Severity,
        details: &Value,
    ) -> Result<i64, DbError> {
        let data = serde_json::to_value(ErrorData {
            message: message.to_string(),
            severity,
            details: details.clone(),
        })?;
        self.record(origin, AuditEvent::Error, Some(&data)).await
    }

    /// The audit log of `execution`, restricted to `events` (all when empty).
    pub async fn audit_log(
        &self,
        execution: &str,
        events: &[AuditEvent],
    ) -> Result<Vec<AuditRow>, DbError> {
        audit::fetch_audit(&self.pool, execution, events).await
    }

    /// Actor checkpoints and phase boundaries of `execution`, in execution
    /// order.
    pub async fn checkpoints(&self, execution: &str) -> Result<Vec<AuditRow>, DbError> {
        self.audit_log(
            execution,
            &[
                AuditEvent::Checkpoint,
                AuditEvent::PhaseCheckpoint,
                AuditEvent::PhaseSkipped,
                AuditEvent::PhaseComplete,
            ],
        )
        .await
    }

    /// Errors reported within `execution`, in execution order.
    pub async fn errors(&self, execution: &str) -> Result<Vec<ErrorRecord>, DbError> {
        self.audit_log(execution, &[AuditEvent::Error])
            .await?
            .into_iter()
            .map(ErrorRecord::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_bus() -> (TempDir, MessageBus) {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::open(&StoreConfig::in_dir(dir.path())).await.unwrap();
        (dir, bus)
    }

    fn origin(execution: &str, actor: &str) -> Origin {
        Origin::new(execution, "host-a", actor, "facts")
    }

    #[tokio::test]
    async fn identical_payloads_are_stored_once() {
        let (_dir, bus) = open_bus().await;
        let payload = json!({ "packages": ["kernel", "glibc"] });

        bus.produce(&origin("e1", "scan"), "system", "InstalledPackages", &payload)
            .await
            .unwrap();
        bus.produce(&origin("e1", "scan"), "system", "InstalledPackages", &payload)
            .await
            .unwrap();

        assert_eq!(bus.payload_count().await.unwrap(), 1);
        let rows = bus.consume("e1", &["InstalledPackages".into()]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hash, rows[1].hash);
        assert_eq!(rows[0].payload().unwrap(), payload);
    }

    #[tokio::test]
    async fn consume_is_scoped_to_execution_and_type() {
        let (_dir, bus) = open_bus().await;
        bus.produce(&origin("e1", "a"), "t", "M1", &json!(1)).await.unwrap();
        bus.produce(&origin("e1", "a"), "t", "M2", &json!(2)).await.unwrap();
        bus.produce(&origin("e2", "a"), "t", "M1", &json!(3)).await.unwrap();

        let rows = bus.consume("e1", &["M1".into()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload().unwrap(), json!(1));
        assert_eq!(rows[0].actor, "a");
        assert_eq!(rows[0].phase, "facts");
        assert_eq!(rows[0].hostname, "host-a");

        assert!(bus.consume("e1", &[]).await.unwrap().is_empty());

        // Broadcast: a second read sees the same rows again.
        assert_eq!(bus.consume("e1", &["M1".into(), "M2".into()]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn errors_and_checkpoints_are_read_back_in_order() {
        let (_dir, bus) = open_bus().await;
        bus.checkpoint(&origin("e1", "first")).await.unwrap();
        bus.report_error(
            &origin("e1", "second"),
            "disk full",
            Severity::Error,
            &json!({ "free": 0 }),
        )
        .await
        .unwrap();
        bus.record(&origin("e1", "engine"), AuditEvent::PhaseComplete, None)
            .await
            .unwrap();

        let checkpoints = bus.checkpoints("e1").await.unwrap();
        let events: Vec<_> = checkpoints.iter().map(|r| r.event().unwrap()).collect();
        assert_eq!(events, vec![AuditEvent::Checkpoint, AuditEvent::PhaseComplete]);

        let errors = bus.errors("e1").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].actor, "second");
        assert_eq!(errors[0].severity, Severity::Error);
        assert_eq!(errors[0].details, json!({ "free": 0 }));

        assert!(bus.errors("e2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn produced_messages_are_audited() {
        let (_dir, bus) = open_bus().await;
        let id = bus.inject("e1", "host-a", "config", "Config", &json!({})).await.unwrap();

        let log = bus.audit_log("e1", &[AuditEvent::NewMessage]).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message_id, Some(id));
        assert_eq!(log[0].actor, WORKFLOW_SOURCE);
        assert_eq!(log[0].phase, INIT_PHASE);
    }

    #[tokio::test]
    async fn audit_rows_cannot_be_rewritten() {
        let (_dir, bus) = open_bus().await;
        bus.checkpoint(&origin("e1", "a")).await.unwrap();

        let result = sqlx::query("DELETE FROM audit").execute(bus.pool()).await;
        assert!(result.is_err());
        assert_eq!(bus.checkpoints("e1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reopening_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        {
            let bus = MessageBus::open(&config).await.unwrap();
            bus.create_execution("e1", "upgrade", &json!({ "target": "9" }))
                .await
                .unwrap();
            bus.pool().close().await;
        }

        let bus = MessageBus::open(&config).await.unwrap();
        let executions = bus.list_executions().await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].context, "e1");
        assert_eq!(executions[0].kind, "upgrade");
    }
}
