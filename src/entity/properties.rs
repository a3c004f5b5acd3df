/**
 * Kind-specific property projection (C2).
 *
 * Single source of truth for which fields each entity kind carries in its
 * structured properties. `project_properties` reads `entity.structured` and
 * returns only the keys relevant to `entity.kind`, silently dropping the
 * rest; callers pass the result to the graph driver for the structured
 * column AND fold it into metadata so a generic reader needs no kind
 * knowledge (per the data model's duplication invariant).
 */
use serde_json::Value as JsonValue;

use super::types::{Entity, EntityKind, Metadata};

/// Folds `description`/`content` into a copy of `entity.metadata`, the same
/// way kind-specific structured fields are folded in by `merge_into_metadata`.
/// These two fields have no dedicated storage column (`nodes` only carries
/// `metadata`/`structured`), so they must round-trip through metadata or a
/// write silently drops them and every subsequent `get` reads back `None`.
pub fn metadata_with_body(entity: &Entity) -> Metadata {
    let mut metadata = entity.metadata.clone();
    match &entity.description {
        Some(d) => metadata.insert("description".to_string(), JsonValue::String(d.clone())),
        None => metadata.remove("description"),
    };
    match &entity.content {
        Some(c) => metadata.insert("content".to_string(), JsonValue::String(c.clone())),
        None => metadata.remove("content"),
    };
    metadata
}

/// Keys relevant to each entity kind's structured properties.
pub fn projected_keys(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Task => &[
            "status",
            "priority",
            "project_id",
            "epic_id",
            "assignees",
            "technologies",
            "feature",
            "domain",
            "due_date",
            "estimated_hours",
            "branch_name",
            "pr_url",
        ],
        EntityKind::Project => &["status", "tech_stack", "repository_url"],
        EntityKind::Epic => &["status", "priority", "project_id", "assignees", "target_date", "learnings"],
        EntityKind::Note => &["task_id", "author_type", "author_name"],
        EntityKind::Agent => &[
            "agent_type",
            "spawn_source",
            "status",
            "project_id",
            "task_id",
            "worktree_path",
            "worktree_branch",
            "started_at",
            "last_heartbeat",
            "session_id",
        ],
        EntityKind::Approval => &[
            "project_id",
            "agent_id",
            "task_id",
            "approval_type",
            "status",
            "priority",
            "title",
            "summary",
            "response_by",
            "responded_at",
            "response_message",
        ],
        EntityKind::Checkpoint => &["agent_id", "session_id", "conversation_history", "current_step"],
        _ => &[],
    }
}

/// Project `entity.structured` down to the fields relevant to its kind.
/// Unknown/irrelevant keys are dropped; this is the single function both
/// `create_direct` and `update` call so behavior can't drift between them.
pub fn project_structured(entity: &Entity) -> Metadata {
    let keys = projected_keys(entity.kind);
    entity
        .structured
        .iter()
        .filter(|(k, _)| keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Mirror projected structured properties into metadata, per the data
/// model's invariant that a generic reader can consume kind-specific
/// fields without schema knowledge. Existing metadata keys are preserved;
/// structured fields take precedence on conflict.
pub fn merge_into_metadata(metadata: &Metadata, structured: &Metadata) -> Metadata {
    let mut merged = metadata.clone();
    for (k, v) in structured {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_structured_drops_unknown_keys() {
        let mut e = Entity::new("t1", "tenant", EntityKind::Task, "Task 1");
        e.structured.insert("status".to_string(), json!("doing"));
        e.structured.insert("not_a_task_field".to_string(), json!("x"));
        let projected = project_structured(&e);
        assert!(projected.contains_key("status"));
        assert!(!projected.contains_key("not_a_task_field"));
    }

    #[test]
    fn test_merge_into_metadata_structured_wins_on_conflict() {
        let mut metadata = Metadata::new();
        metadata.insert("status".to_string(), json!("old"));
        let mut structured = Metadata::new();
        structured.insert("status".to_string(), json!("new"));

        let merged = merge_into_metadata(&metadata, &structured);
        assert_eq!(merged["status"], json!("new"));
    }

    #[test]
    fn test_non_task_kind_has_no_task_fields() {
        let mut e = Entity::new("n1", "tenant", EntityKind::Note, "Note");
        e.structured.insert("estimated_hours".to_string(), json!(3));
        let projected = project_structured(&e);
        assert!(projected.is_empty());
    }
}
