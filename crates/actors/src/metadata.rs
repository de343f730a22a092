//! Declared actor metadata: message types, tags and capabilities.
//!
//! These values are built by the external loader and never change once an
//! actor is registered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// A named, versioned message schema identifier.
///
/// Scheduling and bus lookups use `name`; `topic` is stored alongside each
/// message for reporting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageType {
    pub name: String,
    pub topic: String,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl MessageType {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            version: default_version(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A typed payload an actor hands to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub payload: Value,
}

impl Message {
    pub fn new(msg_type: MessageType, payload: Value) -> Self {
        Self { msg_type, payload }
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Which derived group of a tag an actor joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagGroup {
    /// Runs in the tag's main stage.
    Main,
    /// Runs in the stage before the main one.
    Before,
    /// Runs in the stage after the main one.
    After,
    /// Runs in the main stage of every workflow using the tag.
    Common,
}

/// A reference from an actor to one group of a tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagRef {
    pub tag: String,
    pub group: TagGroup,
}

impl TagRef {
    pub fn new(tag: impl Into<String>, group: TagGroup) -> Self {
        Self { tag: tag.into(), group }
    }

    pub fn main(tag: impl Into<String>) -> Self {
        Self::new(tag, TagGroup::Main)
    }

    pub fn before(tag: impl Into<String>) -> Self {
        Self::new(tag, TagGroup::Before)
    }

    pub fn after(tag: impl Into<String>) -> Self {
        Self::new(tag, TagGroup::After)
    }

    pub fn common(tag: impl Into<String>) -> Self {
        Self::new(tag, TagGroup::Common)
    }
}

// ---------------------------------------------------------------------------
// ActorMetadata
// ---------------------------------------------------------------------------

/// Everything an actor declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMetadata {
    /// Unique within a loaded actor set.
    pub name: String,
    pub consumes: Vec<MessageType>,
    pub produces: Vec<MessageType>,
    pub tags: Vec<TagRef>,
    /// Names of the capabilities the actor relies on.
    pub capabilities: Vec<String>,
}

impl ActorMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumes: Vec::new(),
            produces: Vec::new(),
            tags: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn consumes(mut self, types: impl IntoIterator<Item = MessageType>) -> Self {
        self.consumes.extend(types);
        self
    }

    pub fn produces(mut self, types: impl IntoIterator<Item = MessageType>) -> Self {
        self.produces.extend(types);
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = TagRef>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn capabilities<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.capabilities.extend(names.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_declarations() {
        let facts = MessageType::new("SystemFacts", "system_info");
        let meta = ActorMetadata::new("scan_system")
            .produces([facts.clone()])
            .tags([TagRef::main("facts"), TagRef::before("checks")])
            .capabilities(["rpm"]);

        assert_eq!(meta.produces, vec![facts]);
        assert!(meta.consumes.is_empty());
        assert_eq!(meta.tags.len(), 2);
        assert_eq!(meta.tags[1].group, TagGroup::Before);
        assert_eq!(meta.capabilities, vec!["rpm".to_string()]);
    }

    #[test]
    fn message_type_defaults_to_version_one() {
        let t: MessageType = serde_json::from_str(r#"{ "name": "M", "topic": "t" }"#).unwrap();
        assert_eq!(t.version, 1);
        assert_eq!(MessageType::new("M", "t").with_version(2).version, 2);
    }
}
