//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("payload (de)serialisation failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unexpected value '{value}' in column '{column}'")]
    InvalidValue { column: &'static str, value: String },

    #[error("execution '{execution}' is already being driven by another run")]
    Locked { execution: String },

    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}
