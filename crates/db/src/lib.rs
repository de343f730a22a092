//! `db` crate — the message bus and audit store.
//!
//! Provides a SQLite connection pool with embedded forward migrations, typed
//! row structs, repository functions for every table in the store schema,
//! the [`MessageBus`] facade the engine drives, and the per-execution
//! advisory [`ExecutionLock`].  No scheduling logic lives here.

pub mod bus;
pub mod error;
pub mod lock;
pub mod models;
pub mod pool;
pub mod repository;

pub use bus::MessageBus;
pub use error::DbError;
pub use lock::ExecutionLock;
pub use models::{AuditEvent, AuditRow, ErrorRecord, ExecutionRow, MessageRow, Origin, Severity};
pub use pool::{DbPool, StoreConfig};
