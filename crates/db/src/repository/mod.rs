//! Repository functions — one function per store operation.
//!
//! Writes take a `&mut SqliteConnection` so callers can group them in one
//! transaction; reads take a `&DbPool`.  No scheduling logic, no domain
//! types — pure SQL.

pub mod audit;
pub mod executions;
pub mod messages;
pub mod sources;
