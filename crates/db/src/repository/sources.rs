//! Host and data-source repository functions.
//!
//! Both tables are keyed by their natural identity, so lookups insert on
//! first use and return the existing id afterwards.

use sqlx::SqliteConnection;

use crate::{models::Origin, DbError};

/// Return the id of the `host` row for (`context`, `hostname`), creating it
/// if needed.
pub async fn get_or_create_host(
    conn: &mut SqliteConnection,
    context: &str,
    hostname: &str,
) -> Result<i64, DbError> {
    sqlx::query("INSERT OR IGNORE INTO host (context, hostname) VALUES (?1, ?2)")
        .bind(context)
        .bind(hostname)
        .execute(&mut *conn)
        .await?;

    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM host WHERE context = ?1 AND hostname = ?2",
    )
    .bind(context)
    .bind(hostname)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Return the id of the `data_source` row for `origin`, creating the host
/// and data source rows if needed.
pub async fn get_or_create_data_source(
    conn: &mut SqliteConnection,
    origin: &Origin,
) -> Result<i64, DbError> {
    let host_id = get_or_create_host(conn, &origin.execution, &origin.hostname).await?;

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO data_source (context, host_id, actor, phase)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(&origin.execution)
    .bind(host_id)
    .bind(&origin.actor)
    .bind(&origin.phase)
    .execute(&mut *conn)
    .await?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM data_source
        WHERE context = ?1 AND host_id = ?2 AND actor = ?3 AND phase = ?4
        "#,
    )
    .bind(&origin.execution)
    .bind(host_id)
    .bind(&origin.actor)
    .bind(&origin.phase)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}
