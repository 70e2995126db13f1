//! Named vector and matrix tags.
//!
//! A tag identifies one of several vectors (or matrices) that values can be read from or
//! contributions accumulated into, e.g. the residual, its time-dependent part, or a retained
//! solution state. Tag names are case-insensitive and stored in upper case.
use crate::field::{SolutionState, TagId};
use serde::{Deserialize, Serialize};

/// The role of a vector tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorTagKind {
    /// Accumulates residual contributions.
    Residual,
    /// Refers to a solution vector. Reading it may require older states to be retained.
    Solution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorTag {
    pub id: TagId,
    pub name: String,
    pub kind: VectorTagKind,
}

/// Registry of vector and matrix tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRegistry {
    vector_tags: Vec<VectorTag>,
    matrix_tags: Vec<String>,
}

pub const SOLUTION_TAG: &str = "SOLUTION";
pub const OLD_SOLUTION_TAG: &str = "SOLUTION_STATE_1";
pub const OLDER_SOLUTION_TAG: &str = "SOLUTION_STATE_2";
pub const PREVIOUS_NEWTON_TAG: &str = "U_PREVIOUS_NL_NEWTON";
pub const TIME_TAG: &str = "TIME";
pub const NONTIME_TAG: &str = "NONTIME";
pub const RESIDUAL_TAG: &str = "RESIDUAL";
pub const SYSTEM_TAG: &str = "SYSTEM";

impl Default for TagRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for name in [SOLUTION_TAG, OLD_SOLUTION_TAG, OLDER_SOLUTION_TAG, PREVIOUS_NEWTON_TAG] {
            registry.add_vector_tag(name, VectorTagKind::Solution);
        }
        for name in [TIME_TAG, NONTIME_TAG, RESIDUAL_TAG] {
            registry.add_vector_tag(name, VectorTagKind::Residual);
        }
        registry.add_matrix_tag(SYSTEM_TAG);
        registry.add_matrix_tag(TIME_TAG);
        registry
    }
}

impl TagRegistry {
    /// A registry without any tags, not even the built-in ones.
    pub fn empty() -> Self {
        Self {
            vector_tags: Vec::new(),
            matrix_tags: Vec::new(),
        }
    }

    /// Adds a vector tag, or returns the id of the existing tag with the same name.
    pub fn add_vector_tag(&mut self, name: &str, kind: VectorTagKind) -> TagId {
        if let Some(id) = self.vector_tag_id(name) {
            return id;
        }
        let id = self.vector_tags.len();
        self.vector_tags.push(VectorTag {
            id,
            name: name.to_uppercase(),
            kind,
        });
        id
    }

    /// Adds a matrix tag, or returns the id of the existing tag with the same name.
    pub fn add_matrix_tag(&mut self, name: &str) -> TagId {
        if let Some(id) = self.matrix_tag_id(name) {
            return id;
        }
        self.matrix_tags.push(name.to_uppercase());
        self.matrix_tags.len() - 1
    }

    pub fn vector_tag_id(&self, name: &str) -> Option<TagId> {
        let name = name.to_uppercase();
        self.vector_tags
            .iter()
            .position(|tag| tag.name == name)
    }

    pub fn matrix_tag_id(&self, name: &str) -> Option<TagId> {
        let name = name.to_uppercase();
        self.matrix_tags.iter().position(|tag| *tag == name)
    }

    pub fn vector_tag(&self, id: TagId) -> Option<&VectorTag> {
        self.vector_tags.get(id)
    }

    pub fn matrix_tag_name(&self, id: TagId) -> Option<&str> {
        self.matrix_tags.get(id).map(String::as_str)
    }

    pub fn vector_tags(&self) -> &[VectorTag] {
        &self.vector_tags
    }

    pub fn num_matrix_tags(&self) -> usize {
        self.matrix_tags.len()
    }

    /// The solution state a solution tag refers to.
    ///
    /// Returns `None` for residual tags and solution tags that do not name a retained state.
    pub fn solution_state(&self, id: TagId) -> Option<SolutionState> {
        let tag = self.vector_tag(id)?;
        if tag.kind != VectorTagKind::Solution {
            return None;
        }
        match tag.name.as_str() {
            SOLUTION_TAG => Some(SolutionState::Current),
            OLD_SOLUTION_TAG => Some(SolutionState::Old),
            OLDER_SOLUTION_TAG => Some(SolutionState::Older),
            PREVIOUS_NEWTON_TAG => Some(SolutionState::PreviousNewton),
            _ => None,
        }
    }
}
