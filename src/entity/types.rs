/**
 * Entity Types (C2)
 *
 * DESIGN DECISION: One `Entity` struct for every kind, with kind-specific
 * fields living in `structured` (a typed side-table) that is also mirrored
 * into `metadata` at write time.
 * WHY: Callers that only know "this is a graph node" (the relationship
 * manager, generic list views) can read `Entity` without matching on kind;
 * callers that need task-specific fields go through `properties.rs`.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of entity kinds. Unknown strings from storage fall back to
/// `Topic` rather than failing the read (defense in depth against schema
/// drift, per C2's node/entity conversion rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Epic,
    Task,
    Note,
    Episode,
    Pattern,
    Rule,
    Template,
    Agent,
    Checkpoint,
    Approval,
    Source,
    Document,
    Chunk,
    /// Default for unrecognized stored kind tags.
    Topic,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Epic => "epic",
            EntityKind::Task => "task",
            EntityKind::Note => "note",
            EntityKind::Episode => "episode",
            EntityKind::Pattern => "pattern",
            EntityKind::Rule => "rule",
            EntityKind::Template => "template",
            EntityKind::Agent => "agent",
            EntityKind::Checkpoint => "checkpoint",
            EntityKind::Approval => "approval",
            EntityKind::Source => "source",
            EntityKind::Document => "document",
            EntityKind::Chunk => "chunk",
            EntityKind::Topic => "topic",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for EntityKind {
    fn from(s: &str) -> Self {
        match s {
            "project" => EntityKind::Project,
            "epic" => EntityKind::Epic,
            "task" => EntityKind::Task,
            "note" => EntityKind::Note,
            "episode" => EntityKind::Episode,
            "pattern" => EntityKind::Pattern,
            "rule" => EntityKind::Rule,
            "template" => EntityKind::Template,
            "agent" => EntityKind::Agent,
            "checkpoint" => EntityKind::Checkpoint,
            "approval" => EntityKind::Approval,
            "source" => EntityKind::Source,
            "document" => EntityKind::Document,
            "chunk" => EntityKind::Chunk,
            _ => EntityKind::Topic,
        }
    }
}

pub type Metadata = BTreeMap<String, JsonValue>;

/// Generic, kind-agnostic view of a graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub tenant_id: String,
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub metadata: Metadata,
    /// Kind-specific fields, also mirrored into `metadata` at write time.
    pub structured: Metadata,
    pub name_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, kind: EntityKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            kind,
            name: name.into(),
            description: None,
            content: None,
            metadata: Metadata::new(),
            structured: Metadata::new(),
            name_embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Text the embedder runs over: `name + ". " + description`, truncated
    /// to 2000 chars (the spec's cap on embedding input length).
    pub fn embedding_source_text(&self) -> String {
        let mut text = self.name.clone();
        if let Some(desc) = &self.description {
            text.push_str(". ");
            text.push_str(desc);
        }
        text.chars().take(2000).collect()
    }
}

/// A merge-style update: only present fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    /// Metadata keys to merge in (last write wins per key).
    pub metadata: Option<Metadata>,
    /// Kind-specific fields to overwrite.
    pub structured: Option<Metadata>,
    /// `Some(None)` clears the embedding; `None` leaves it untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Option<Vec<f32>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            EntityKind::Project,
            EntityKind::Task,
            EntityKind::Approval,
            EntityKind::Chunk,
        ] {
            assert_eq!(EntityKind::from(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_unknown_kind_falls_back_to_topic() {
        assert_eq!(EntityKind::from("unknown_kind_xyz"), EntityKind::Topic);
    }

    #[test]
    fn test_embedding_source_text_truncates() {
        let mut e = Entity::new("e1", "t1", EntityKind::Task, "n");
        e.description = Some("x".repeat(3000));
        assert_eq!(e.embedding_source_text().chars().count(), 2000);
    }
}
