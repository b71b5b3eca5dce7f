//! Concept graph model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a concept in the capture it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptKind {
    Secondary,
    Primary,
}

impl ConceptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// A concept node, unique per (owner, name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub kind: ConceptKind,
    pub info_points: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Co-occurrence link between two concepts. The pair is unordered for
/// identity; `source`/`target` keep the orientation of the first insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptEdge {
    pub owner_id: String,
    pub source: String,
    pub target: String,
}

impl ConceptEdge {
    /// Order-independent identity of the edge
    pub fn pair_key(a: &str, b: &str) -> String {
        if a <= b {
            format!("{a}|{b}")
        } else {
            format!("{b}|{a}")
        }
    }
}

/// The owner-scoped node and edge set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptGraph {
    pub nodes: Vec<ConceptNode>,
    pub edges: Vec<ConceptEdge>,
}

/// A concept mentioned in a capture, as extracted from its transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub info_points: Vec<String>,
}

impl Topic {
    pub fn new(name: impl Into<String>, info_points: Vec<String>) -> Self {
        Self {
            name: name.into(),
            info_points,
        }
    }
}

/// Display form of a concept name: trimmed, inner whitespace collapsed
pub fn display_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Uniqueness key of a concept name
pub fn name_key(raw: &str) -> String {
    display_name(raw).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_unordered() {
        assert_eq!(ConceptEdge::pair_key("a", "b"), ConceptEdge::pair_key("b", "a"));
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(display_name("  Rust   borrow checker "), "Rust borrow checker");
        assert_eq!(name_key("Rust  Borrow Checker"), name_key("rust borrow checker"));
    }

    #[test]
    fn test_kind_ordering() {
        assert!(ConceptKind::Primary > ConceptKind::Secondary);
        assert_eq!(ConceptKind::parse("primary"), Some(ConceptKind::Primary));
    }
}
