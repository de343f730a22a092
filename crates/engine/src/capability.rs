//! Capabilities and their resolution.
//!
//! A capability bundles message types an actor may consume or produce and
//! may depend on other capabilities.  Resolving an actor expands every
//! capability it uses, transitively, into the concrete message types the
//! scheduler has to see.

use std::collections::{BTreeMap, BTreeSet};

use actors::{ActorMetadata, MessageType};
use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub consumes: Vec<MessageType>,
    #[serde(default)]
    pub produces: Vec<MessageType>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumes: Vec::new(),
            produces: Vec::new(),
            depends_on: Vec::new(),
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

    pub fn depends_on<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    fn field(&self, field: Field) -> &[MessageType] {
        match field {
            Field::Consumes => &self.consumes,
            Field::Produces => &self.produces,
        }
    }
}

/// Which declaration to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Consumes,
    Produces,
}

pub struct CapabilityResolver<'a> {
    capabilities: &'a BTreeMap<String, Capability>,
}

impl<'a> CapabilityResolver<'a> {
    pub fn new(capabilities: &'a BTreeMap<String, Capability>) -> Self {
        Self { capabilities }
    }

    /// Check every capability's dependencies exist and do not loop.
    ///
    /// # Errors
    /// [`EngineError::UnknownCapability`] or [`EngineError::CapabilityCycle`].
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut done = BTreeSet::new();
        for name in self.capabilities.keys() {
            let mut scratch = BTreeSet::new();
            self.expand(
                name,
                Field::Consumes,
                "capability registry",
                &mut Vec::new(),
                &mut done,
                &mut scratch,
            )?;
        }
        Ok(())
    }

    /// The actor's directly declared `field` plus everything its
    /// capabilities contribute, transitively, without duplicates.
    pub fn resolve(
        &self,
        actor: &ActorMetadata,
        field: Field,
    ) -> Result<BTreeSet<MessageType>, EngineError> {
        let mut out: BTreeSet<MessageType> = match field {
            Field::Consumes => actor.consumes.iter().cloned().collect(),
            Field::Produces => actor.produces.iter().cloned().collect(),
        };
        let referenced_by = format!("actor '{}'", actor.name);
        let mut done = BTreeSet::new();
        for name in &actor.capabilities {
            self.expand(name, field, &referenced_by, &mut Vec::new(), &mut done, &mut out)?;
        }
        Ok(out)
    }

    fn expand(
        &self,
        name: &str,
        field: Field,
        referenced_by: &str,
        stack: &mut Vec<String>,
        done: &mut BTreeSet<String>,
        out: &mut BTreeSet<MessageType>,
    ) -> Result<(), EngineError> {
        if let Some(pos) = stack.iter().position(|seen| seen == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(EngineError::CapabilityCycle { cycle });
        }
        if done.contains(name) {
            return Ok(());
        }

        let capability =
            self.capabilities
                .get(name)
                .ok_or_else(|| EngineError::UnknownCapability {
                    capability: name.to_string(),
                    referenced_by: match stack.last() {
                        Some(parent) => format!("capability '{parent}'"),
                        None => referenced_by.to_string(),
                    },
                })?;

        out.extend(capability.field(field).iter().cloned());

        stack.push(name.to_string());
        for dependency in &capability.depends_on {
            self.expand(dependency, field, referenced_by, stack, done, out)?;
        }
        stack.pop();
        done.insert(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt(name: &str) -> MessageType {
        MessageType::new(name, "test")
    }

    fn registry(caps: Vec<Capability>) -> BTreeMap<String, Capability> {
        caps.into_iter().map(|c| (c.name.clone(), c)).collect()
    }

    #[test]
    fn capabilities_expand_transitively() {
        let caps = registry(vec![
            Capability::new("rpm").consumes([mt("RepoList")]).depends_on(["net"]),
            Capability::new("net").consumes([mt("ProxyConfig")]).produces([mt("NetState")]),
        ]);
        let resolver = CapabilityResolver::new(&caps);
        let actor = ActorMetadata::new("install")
            .consumes([mt("Plan")])
            .capabilities(["rpm"]);

        let consumes = resolver.resolve(&actor, Field::Consumes).unwrap();
        let expected: BTreeSet<_> = [mt("Plan"), mt("RepoList"), mt("ProxyConfig")]
            .into_iter()
            .collect();
        assert_eq!(consumes, expected);

        let produces = resolver.resolve(&actor, Field::Produces).unwrap();
        assert_eq!(produces, [mt("NetState")].into_iter().collect());
    }

    #[test]
    fn resolution_is_idempotent() {
        let caps = registry(vec![
            Capability::new("a").produces([mt("X")]).depends_on(["b", "c"]),
            Capability::new("b").produces([mt("Y")]).depends_on(["c"]),
            Capability::new("c").produces([mt("Z"), mt("X")]),
        ]);
        let resolver = CapabilityResolver::new(&caps);
        let actor = ActorMetadata::new("w").produces([mt("X")]).capabilities(["a", "b"]);

        let first = resolver.resolve(&actor, Field::Produces).unwrap();
        let second = resolver.resolve(&actor, Field::Produces).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn cycles_are_rejected_at_validation() {
        let caps = registry(vec![
            Capability::new("a").depends_on(["b"]),
            Capability::new("b").depends_on(["c"]),
            Capability::new("c").depends_on(["a"]),
        ]);
        match CapabilityResolver::new(&caps).validate() {
            Err(EngineError::CapabilityCycle { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_names_its_parent() {
        let caps = registry(vec![Capability::new("a").depends_on(["ghost"])]);
        assert!(matches!(
            CapabilityResolver::new(&caps).validate(),
            Err(EngineError::UnknownCapability { capability, referenced_by })
                if capability == "ghost" && referenced_by == "capability 'a'"
        ));
    }
}
