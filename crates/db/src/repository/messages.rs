//! Message and content-addressed payload repository functions.

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{models::MessageRow, DbError, DbPool};

const MESSAGE_COLUMNS: &str = r#"
    SELECT m.id, m.context, m.stamp, m.topic, m.type,
           ds.actor, ds.phase, h.hostname,
           md.hash, md.data
    FROM message m
    JOIN data_source ds ON ds.id = m.data_source_id
    JOIN host h ON h.id = ds.host_id
    JOIN message_data md ON md.hash = m.message_data_hash
"#;

/// Sorts object keys recursively so logically equal payloads serialise to
/// the same bytes.
fn canonicalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
            let canonical: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize_json(v)))
                .collect();
            Value::Object(canonical)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize_json).collect()),
        _ => value.clone(),
    }
}

/// Serialise `payload` canonically and return `(hash, data)`.
///
/// The hash is the hex SHA-256 of the canonical JSON text.
pub fn content_address(payload: &Value) -> Result<(String, String), DbError> {
    let data = serde_json::to_string(&canonicalize_json(payload))?;
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    Ok((format!("{:x}", hasher.finalize()), data))
}

/// Store a payload under its hash.  A payload already present is left as is.
pub async fn store_message_data(
    conn: &mut SqliteConnection,
    hash: &str,
    data: &str,
) -> Result<(), DbError> {
    sqlx::query("INSERT OR IGNORE INTO message_data (hash, data) VALUES (?1, ?2)")
        .bind(hash)
        .bind(data)
        .execute(conn)
        .await?;
    Ok(())
}

/// Insert a message row and return its id.
pub async fn insert_message(
    conn: &mut SqliteConnection,
    context: &str,
    topic: &str,
    msg_type: &str,
    data_source_id: i64,
    hash: &str,
) -> Result<i64, DbError> {
    let id = sqlx::query(
        r#"
        INSERT INTO message (context, stamp, topic, type, data_source_id, message_data_hash)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(context)
    .bind(Utc::now())
    .bind(topic)
    .bind(msg_type)
    .bind(data_source_id)
    .bind(hash)
    .execute(conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// All messages of the given types produced within `context`, in the order
/// they were produced.  An empty type list matches nothing.
pub async fn fetch_messages(
    pool: &DbPool,
    context: &str,
    types: &[String],
) -> Result<Vec<MessageRow>, DbError> {
    if types.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(MESSAGE_COLUMNS);
    query.push(" WHERE m.context = ").push_bind(context);
    query.push(" AND m.type IN (");
    let mut separated = query.separated(", ");
    for msg_type in types {
        separated.push_bind(msg_type);
    }
    separated.push_unseparated(") ORDER BY m.id");

    let rows = query.build_query_as::<MessageRow>().fetch_all(pool).await?;
    Ok(rows)
}

/// Every message produced within `context`.
pub async fn fetch_all_messages(pool: &DbPool, context: &str) -> Result<Vec<MessageRow>, DbError> {
    let sql = format!("{MESSAGE_COLUMNS} WHERE m.context = ?1 ORDER BY m.id");
    let rows = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(context)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Number of distinct payloads held in the content-addressed store.
pub async fn count_message_data(pool: &DbPool) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM message_data")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
