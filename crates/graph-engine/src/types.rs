//! Core identifier and slot-type primitives shared across the engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a node within a graph
pub type NodeId = u64;

/// Identifier for a link. Allocated monotonically and never reused.
pub type LinkId = u64;

/// Identifier for a reroute point on a link path
pub type RerouteId = u64;

/// Path-scoped identifier of a node in a flattened graph.
///
/// Top-level nodes use their numeric id rendered as a string; nodes expanded
/// out of a group instance are scoped as `"{outer}:{index}"`, nested
/// recursively, so sibling instances never collide.
pub type ExecutionId = String;

/// Join an outer execution id with an inner node index
pub fn scoped_id(outer: &str, index: usize) -> ExecutionId {
    format!("{outer}:{index}")
}

/// A slot data type.
///
/// Stored as a plain string; comparison rules (wildcards, case folding,
/// multi-types) live in [`crate::typing`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotType(String);

impl SlotType {
    /// The match-anything type
    pub fn any() -> Self {
        Self("*".to_string())
    }

    pub fn new(ty: impl Into<String>) -> Self {
        Self(ty.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the whole-type wildcards: empty, `"0"`, and `"*"`
    pub fn is_wildcard(&self) -> bool {
        self.0.is_empty() || self.0 == "0" || self.0 == "*"
    }

    /// True when the type embeds a `*` without being the bare wildcard,
    /// e.g. `IMAGE/*`
    pub fn has_wildcard_pattern(&self) -> bool {
        !self.is_wildcard() && self.0.contains('*')
    }

    /// True when the type is a comma-separated union, e.g. `INT,FLOAT`
    pub fn is_union(&self) -> bool {
        self.0.contains(',')
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlotType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SlotType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Default for SlotType {
    fn default() -> Self {
        Self::any()
    }
}

/// Reference to a slot by position or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRef {
    Index(usize),
    Name(String),
}

impl From<usize> for SlotRef {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for SlotRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for SlotRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_detection() {
        assert!(SlotType::new("*").is_wildcard());
        assert!(SlotType::new("").is_wildcard());
        assert!(SlotType::new("0").is_wildcard());
        assert!(!SlotType::new("IMAGE").is_wildcard());
    }

    #[test]
    fn test_partial_wildcard_detection() {
        assert!(SlotType::new("IMAGE/*").has_wildcard_pattern());
        assert!(!SlotType::new("*").has_wildcard_pattern());
        assert!(!SlotType::new("IMAGE").has_wildcard_pattern());
    }

    #[test]
    fn test_scoped_id_nesting() {
        let outer = scoped_id("9", 2);
        assert_eq!(outer, "9:2");
        assert_eq!(scoped_id(&outer, 0), "9:2:0");
    }
}
