//! Execution repository functions.

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{models::ExecutionRow, DbError, DbPool};

/// Record a new run (or resume) attempt for `context`.
pub async fn create_execution(
    conn: &mut SqliteConnection,
    context: &str,
    kind: &str,
    configuration: &serde_json::Value,
) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        INSERT INTO execution (context, kind, configuration, stamp)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING id, context, kind, configuration, stamp
        "#,
    )
    .bind(context)
    .bind(kind)
    .bind(serde_json::to_string(configuration)?)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;

    Ok(row)
}

/// Return every execution attempt in insertion order.
pub async fn list_executions(pool: &DbPool) -> Result<Vec<ExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"SELECT id, context, kind, configuration, stamp FROM execution ORDER BY id"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Return the attempts recorded for one execution id, oldest first.
pub async fn executions_for_context(
    pool: &DbPool,
    context: &str,
) -> Result<Vec<ExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, context, kind, configuration, stamp
        FROM execution
        WHERE context = ?1
        ORDER BY id
        "#,
    )
    .bind(context)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
