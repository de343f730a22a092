//! Actor registry — the immutable actor/tag/capability universe a workflow
//! is built from.
//!
//! The external loader feeds tags, capabilities and actors into a
//! [`RegistryBuilder`]; [`RegistryBuilder::build`] validates the whole set,
//! fills in tag membership from the actors' declarations and resolves every
//! actor's capabilities into concrete message types.  Nothing is registered
//! implicitly and nothing changes after `build`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use actors::{Actor, ActorMetadata, MessageType};
use tracing::debug;

use crate::capability::{Capability, CapabilityResolver, Field};
use crate::tags::{Tag, TagSet};
use crate::EngineError;

/// An actor together with its fully resolved message declarations.
#[derive(Clone)]
pub struct RegisteredActor {
    actor: Arc<dyn Actor>,
    consumes: BTreeSet<MessageType>,
    produces: BTreeSet<MessageType>,
}

impl RegisteredActor {
    pub fn name(&self) -> &str {
        self.actor.name()
    }

    pub fn metadata(&self) -> &ActorMetadata {
        self.actor.metadata()
    }

    pub fn actor(&self) -> &Arc<dyn Actor> {
        &self.actor
    }

    /// Directly declared plus capability-derived consumed types.
    pub fn consumes(&self) -> &BTreeSet<MessageType> {
        &self.consumes
    }

    /// Directly declared plus capability-derived produced types.
    pub fn produces(&self) -> &BTreeSet<MessageType> {
        &self.produces
    }
}

impl std::fmt::Debug for RegisteredActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredActor")
            .field("name", &self.name())
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RegistryBuilder {
    tags: TagSet,
    capabilities: Vec<Capability>,
    actors: Vec<Arc<dyn Actor>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag (and its derived groups) if absent.
    pub fn register_tag(&mut self, name: &str) -> &mut Tag {
        self.tags.register(name)
    }

    pub fn tag(mut self, name: &str) -> Self {
        self.register_tag(name);
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Actors keep the order they are added in; that order breaks ties
    /// when scheduling.
    pub fn actor(mut self, actor: Arc<dyn Actor>) -> Self {
        self.actors.push(actor);
        self
    }

    /// Validate and freeze the universe.
    ///
    /// # Errors
    /// Load-time usage errors: duplicate actor or capability names, actors
    /// without tags, references to unregistered tags or unknown
    /// capabilities, and capability dependency cycles.
    pub fn build(self) -> Result<ActorRegistry, EngineError> {
        let Self {
            mut tags,
            capabilities,
            actors,
        } = self;

        let mut capability_map = BTreeMap::new();
        for capability in capabilities {
            let name = capability.name.clone();
            if capability_map.insert(name.clone(), capability).is_some() {
                return Err(EngineError::DuplicateCapability(name));
            }
        }
        let resolver = CapabilityResolver::new(&capability_map);
        resolver.validate()?;

        let mut index = BTreeMap::new();
        let mut registered = Vec::with_capacity(actors.len());

        for actor in actors {
            let meta = actor.metadata();
            if index.insert(meta.name.clone(), registered.len()).is_some() {
                return Err(EngineError::DuplicateActor(meta.name.clone()));
            }
            if meta.tags.is_empty() {
                return Err(EngineError::ActorWithoutTags(meta.name.clone()));
            }

            for tag_ref in &meta.tags {
                let tag = tags.get_mut(&tag_ref.tag).ok_or_else(|| EngineError::UnknownTag {
                    tag: tag_ref.tag.clone(),
                    referenced_by: format!("actor '{}'", meta.name),
                })?;
                tag.add_actor(tag_ref.group, &meta.name);
            }

            let consumes = resolver.resolve(meta, Field::Consumes)?;
            let produces = resolver.resolve(meta, Field::Produces)?;
            debug!(
                actor = %meta.name,
                consumes = consumes.len(),
                produces = produces.len(),
                "registered actor"
            );

            registered.push(RegisteredActor {
                actor: Arc::clone(&actor),
                consumes,
                produces,
            });
        }

        Ok(ActorRegistry {
            tags,
            actors: registered,
            index,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ActorRegistry {
    tags: TagSet,
    actors: Vec<RegisteredActor>,
    index: BTreeMap<String, usize>,
}

impl ActorRegistry {
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// All actors in registration order.
    pub fn actors(&self) -> &[RegisteredActor] {
        &self.actors
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredActor> {
        self.index.get(name).and_then(|&i| self.actors.get(i))
    }

    /// The named actors, in registration order.  Unknown names are ignored.
    pub fn select<'a>(&'a self, names: &BTreeSet<String>) -> Vec<&'a RegisteredActor> {
        self.actors
            .iter()
            .filter(|actor| names.contains(actor.name()))
            .collect()
    }
}
