//! SQLite connection pool and store configuration.

use std::path::PathBuf;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::DbError;

/// Type alias for the shared SQLite pool used across the whole application.
pub type DbPool = SqlitePool;

/// Where the store lives and how it is opened.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLx connection string, e.g. `sqlite:///var/lib/upshift/upshift.db`.
    pub database_url: String,
    /// Pool ceiling.  One writer drives a run, readers may share the rest.
    pub max_connections: u32,
    /// Directory holding the per-execution run lock files.
    pub lock_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///var/lib/upshift/upshift.db".to_string(),
            max_connections: 4,
            lock_dir: PathBuf::from("/var/lib/upshift/locks"),
        }
    }
}

impl StoreConfig {
    /// Build a config from `UPSHIFT_DATABASE_URL` / `UPSHIFT_LOCK_DIR`,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("UPSHIFT_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(dir) = std::env::var("UPSHIFT_LOCK_DIR") {
            config.lock_dir = PathBuf::from(dir);
        }
        config
    }

    /// Store rooted in `dir`: `dir/upshift.db` plus `dir/locks/`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            database_url: format!("sqlite://{}", dir.join("upshift.db").display()),
            max_connections: 4,
            lock_dir: dir.join("locks"),
        }
    }
}

/// Create a new connection pool from the given `database_url`.
///
/// The database file is created if missing.  WAL journaling with
/// `synchronous = FULL` makes every committed transaction durable before the
/// commit returns.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!("Connecting to store (max_connections={})", max_connections);
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Apply pending embedded migrations from `./migrations` (relative to the
/// workspace root at build time).  Existing execution history is never
/// touched; migrations only move the schema forward.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("Running store migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
