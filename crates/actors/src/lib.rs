//! `actors` crate — the `Actor` trait, its declared metadata, the
//! `RunContext` handed to every invocation, and a mock actor for tests.
//!
//! Every actor, whatever loader discovered it, must implement [`Actor`].
//! The engine dispatches execution through this trait object and only ever
//! observes what the actor writes through its [`RunContext`].

pub mod context;
pub mod error;
pub mod metadata;
pub mod mock;
pub mod traits;

pub use context::{ActorCommand, ReportedError, RunContext};
pub use db::Severity;
pub use error::ActorError;
pub use metadata::{ActorMetadata, Message, MessageType, TagGroup, TagRef};
pub use traits::Actor;
