//! Tag model.
//!
//! A tag marks which phase an actor belongs to.  Every registered tag has
//! four membership groups: the main stage plus the derived before, after and
//! common-to-all-workflows groups.  Membership is filled in while the actor
//! registry is built and frozen afterwards.

use std::collections::{BTreeMap, BTreeSet};

use actors::TagGroup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    name: String,
    main: BTreeSet<String>,
    before: BTreeSet<String>,
    after: BTreeSet<String>,
    common: BTreeSet<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            main: BTreeSet::new(),
            before: BTreeSet::new(),
            after: BTreeSet::new(),
            common: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `actor` to `group`.  Adding the same actor twice stores it once.
    pub fn add_actor(&mut self, group: TagGroup, actor: &str) {
        self.group_mut(group).insert(actor.to_string());
    }

    pub fn actors(&self, group: TagGroup) -> &BTreeSet<String> {
        match group {
            TagGroup::Main => &self.main,
            TagGroup::Before => &self.before,
            TagGroup::After => &self.after,
            TagGroup::Common => &self.common,
        }
    }

    fn group_mut(&mut self, group: TagGroup) -> &mut BTreeSet<String> {
        match group {
            TagGroup::Main => &mut self.main,
            TagGroup::Before => &mut self.before,
            TagGroup::After => &mut self.after,
            TagGroup::Common => &mut self.common,
        }
    }
}

/// All registered tags, by name.
#[derive(Debug, Clone, Default)]
pub struct TagSet {
    tags: BTreeMap<String, Tag>,
}

impl TagSet {
    /// Return the tag called `name`, creating it (with empty groups) if absent.
    pub fn register(&mut self, name: &str) -> &mut Tag {
        self.tags
            .entry(name.to_string())
            .or_insert_with(|| Tag::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Tag> {
        self.tags.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_and_keeps_members() {
        let mut tags = TagSet::default();
        tags.register("facts").add_actor(TagGroup::Main, "scan");
        tags.register("facts");

        assert_eq!(tags.iter().count(), 1);
        let facts = tags.get("facts").unwrap();
        assert!(facts.actors(TagGroup::Main).contains("scan"));
        assert!(facts.actors(TagGroup::Before).is_empty());
    }

    #[test]
    fn adding_an_actor_twice_stores_it_once() {
        let mut tag = Tag::new("checks");
        tag.add_actor(TagGroup::After, "report");
        tag.add_actor(TagGroup::After, "report");
        assert_eq!(tag.actors(TagGroup::After).len(), 1);
        assert!(tag.actors(TagGroup::Main).is_empty());
    }
}
