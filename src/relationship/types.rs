/**
 * Relationship Types (C3)
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of edge kinds. Unknown stored strings deserialize to
/// `RelatedTo` rather than failing the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    BelongsTo,
    DependsOn,
    Requires,
    PartOf,
    References,
    DerivedFrom,
    RelatedTo,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::BelongsTo => "BELONGS_TO",
            RelationshipKind::DependsOn => "DEPENDS_ON",
            RelationshipKind::Requires => "REQUIRES",
            RelationshipKind::PartOf => "PART_OF",
            RelationshipKind::References => "REFERENCES",
            RelationshipKind::DerivedFrom => "DERIVED_FROM",
            RelationshipKind::RelatedTo => "RELATED_TO",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for RelationshipKind {
    fn from(s: &str) -> Self {
        match s {
            "BELONGS_TO" => RelationshipKind::BelongsTo,
            "DEPENDS_ON" => RelationshipKind::DependsOn,
            "REQUIRES" => RelationshipKind::Requires,
            "PART_OF" => RelationshipKind::PartOf,
            "REFERENCES" => RelationshipKind::References,
            "DERIVED_FROM" => RelationshipKind::DerivedFrom,
            _ => RelationshipKind::RelatedTo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub tenant_id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationshipKind,
    /// Missing on read defaults to 1.0.
    pub weight: f64,
    pub metadata: BTreeMap<String, JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, source_id: impl Into<String>, target_id: impl Into<String>, kind: RelationshipKind) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            weight: 1.0,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }
}
