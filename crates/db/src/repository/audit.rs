//! Audit repository functions.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    models::{AuditEvent, AuditRow},
    DbError, DbPool,
};

const AUDIT_COLUMNS: &str = r#"
    SELECT a.id, a.context, a.event, a.stamp,
           ds.actor, ds.phase, h.hostname,
           a.message_id, a.data
    FROM audit a
    JOIN data_source ds ON ds.id = a.data_source_id
    JOIN host h ON h.id = ds.host_id
"#;

/// Append an audit row and return its id.
pub async fn insert_audit(
    conn: &mut SqliteConnection,
    context: &str,
    event: AuditEvent,
    data_source_id: i64,
    message_id: Option<i64>,
    data: Option<&str>,
) -> Result<i64, DbError> {
    let id = sqlx::query(
        r#"
        INSERT INTO audit (context, event, stamp, data_source_id, message_id, data)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(context)
    .bind(event.as_str())
    .bind(Utc::now())
    .bind(data_source_id)
    .bind(message_id)
    .bind(data)
    .execute(conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Audit rows of the given kinds for `context`, in insertion order.  An
/// empty kind list returns the whole log.
pub async fn fetch_audit(
    pool: &DbPool,
    context: &str,
    events: &[AuditEvent],
) -> Result<Vec<AuditRow>, DbError> {
    let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(AUDIT_COLUMNS);
    query.push(" WHERE a.context = ").push_bind(context);
    if !events.is_empty() {
        query.push(" AND a.event IN (");
        let mut separated = query.separated(", ");
        for event in events {
            separated.push_bind(event.as_str());
        }
        separated.push_unseparated(")");
    }
    query.push(" ORDER BY a.id");

    let rows = query.build_query_as::<AuditRow>().fetch_all(pool).await?;
    Ok(rows)
}
