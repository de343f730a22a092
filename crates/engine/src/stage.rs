//! Stage filter: which actors run in the before, main and after stages of a
//! phase.
//!
//! For the before/after stages an actor must be in the primary tag's
//! matching group *and* in the matching group of every extra tag.  The main
//! stage is the same intersection over the main groups, plus every actor in
//! the primary tag's common group, which does not need the extra tags.

use std::collections::BTreeSet;

use actors::TagGroup;
use serde::{Deserialize, Serialize};

use crate::tags::{Tag, TagSet};
use crate::EngineError;

/// The three stages of a phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagePosition {
    Before,
    Main,
    After,
}

impl StagePosition {
    fn group(self) -> TagGroup {
        match self {
            Self::Before => TagGroup::Before,
            Self::Main => TagGroup::Main,
            Self::After => TagGroup::After,
        }
    }
}

impl std::fmt::Display for StagePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::Main => write!(f, "main"),
            Self::After => write!(f, "after"),
        }
    }
}

impl std::str::FromStr for StagePosition {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "before" => Ok(Self::Before),
            "main" => Ok(Self::Main),
            "after" => Ok(Self::After),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Tag selection for one phase.
#[derive(Debug, Clone)]
pub struct StageFilter<'a> {
    primary: &'a Tag,
    extra: Vec<&'a Tag>,
}

impl<'a> StageFilter<'a> {
    /// # Errors
    /// [`EngineError::UnknownTag`] if `primary` or any of `extra` is not
    /// registered in `tags`.
    pub fn new(tags: &'a TagSet, primary: &str, extra: &[String]) -> Result<Self, EngineError> {
        let lookup = |name: &str| {
            tags.get(name).ok_or_else(|| EngineError::UnknownTag {
                tag: name.to_string(),
                referenced_by: format!("stage filter for '{primary}'"),
            })
        };

        let primary_tag = lookup(primary)?;
        let extra = extra
            .iter()
            .map(|name| lookup(name.as_str()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            primary: primary_tag,
            extra,
        })
    }

    /// Names of the actors selected for `position`.
    pub fn compute(&self, position: StagePosition) -> BTreeSet<String> {
        let group = position.group();
        let mut selected = self.primary.actors(group).clone();
        for tag in &self.extra {
            let members = tag.actors(group);
            selected.retain(|actor| members.contains(actor));
        }
        if position == StagePosition::Main {
            selected.extend(self.primary.actors(TagGroup::Common).iter().cloned());
        }
        selected
    }
}
