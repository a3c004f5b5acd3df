/**
 * Relationship Manager (C3)
 *
 * DESIGN DECISION: One manager instance bound to exactly one tenant at
 * construction, mirroring `EntityManager` (C2) — no method here takes a
 * tenant parameter.
 *
 * Edge identity is `(source, target, kind)`: `create` checks for an
 * existing edge on that triple before inserting, per the data model's
 * at-most-one-edge-per-triple invariant. A different-kind edge between the
 * same pair is a distinct edge and is allowed to coexist.
 */
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph::GraphDriver;
use crate::tenant::TenantId;

use super::types::{Direction, Relationship, RelationshipKind};
use crate::entity::Entity;

pub struct RelationshipManager {
    driver: Arc<GraphDriver>,
    tenant: TenantId,
}

impl RelationshipManager {
    pub fn new(driver: Arc<GraphDriver>, tenant: TenantId) -> Self {
        Self { driver, tenant }
    }

    /// Idempotent on `(source, target, kind)`: a second call with the same
    /// triple returns the existing edge's id rather than creating a
    /// duplicate. A different-kind edge between the same pair is created
    /// as a second, independent edge.
    pub async fn create(&self, rel: Relationship) -> Result<String> {
        let tenant = self.tenant.as_str().to_string();
        let source = rel.source_id.clone();
        let target = rel.target_id.clone();
        let kind = rel.kind.as_str().to_string();

        let existing: Option<String> = self
            .driver
            .read(&self.tenant, {
                let tenant = tenant.clone();
                let source = source.clone();
                let target = target.clone();
                let kind = kind.clone();
                move |conn| {
                    conn.query_row(
                        "SELECT id FROM edges WHERE tenant_id = ?1 AND source_id = ?2 AND target_id = ?3 AND kind = ?4",
                        params![tenant, source, target, kind],
                        |row| row.get(0),
                    )
                    .optional()
                }
            })
            .await?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let id = if rel.id.is_empty() { format!("rel_{}", Uuid::new_v4().simple()) } else { rel.id.clone() };
        let metadata_json = serde_json::to_string(&rel.metadata)?;
        let created_at = rel.created_at.to_rfc3339();
        let weight = rel.weight;

        let insert_result = self
            .driver
            .write(&self.tenant, {
                let id = id.clone();
                let tenant = tenant.clone();
                move |conn| {
                    conn.execute(
                        "INSERT INTO edges (id, tenant_id, source_id, target_id, kind, weight, metadata, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![id, tenant, source, target, kind, weight, metadata_json, created_at],
                    )
                }
            })
            .await;

        match insert_result {
            Ok(_) => Ok(id),
            // A racing writer may have inserted the same triple between our
            // check and our insert; the UNIQUE constraint catches it, and
            // we fall back to idempotent-return rather than surfacing a
            // spurious conflict.
            Err(Error::Transient(msg)) if msg.contains("UNIQUE constraint") => {
                let tenant = tenant.clone();
                self.driver
                    .read(&self.tenant, move |conn| {
                        conn.query_row(
                            "SELECT id FROM edges WHERE tenant_id = ?1 AND source_id = ?2 AND target_id = ?3 AND kind = ?4",
                            params![tenant, rel.source_id, rel.target_id, rel.kind.as_str()],
                            |row| row.get(0),
                        )
                    })
                    .await
            }
            Err(e) => Err(e),
        }
        .map(|_: String| id)
    }

    /// Returns `(created, failed)`; one failure does not abort the batch.
    pub async fn create_bulk(&self, rels: Vec<Relationship>) -> (usize, usize) {
        let mut created = 0usize;
        let mut failed = 0usize;
        for rel in rels {
            match self.create(rel).await {
                Ok(_) => created += 1,
                Err(e) => {
                    warn!(error = %e, "bulk relationship create failed");
                    failed += 1;
                }
            }
        }
        (created, failed)
    }

    /// Tolerates transient read failures by returning empty rather than
    /// raising. Writes still raise.
    pub async fn get_for_entity(&self, entity_id: &str, direction: Direction, kinds: Option<Vec<RelationshipKind>>) -> Vec<Relationship> {
        let tenant = self.tenant.as_str().to_string();
        let entity_id = entity_id.to_string();

        let fetch = |column: &'static str| {
            let tenant = tenant.clone();
            let entity_id = entity_id.clone();
            async move {
                self.driver
                    .read(&self.tenant, move |conn| {
                        let sql = format!(
                            "SELECT id, tenant_id, source_id, target_id, kind, weight, metadata, created_at \
                             FROM edges WHERE tenant_id = ?1 AND {column} = ?2"
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        crate::graph::normalize_rows(&mut stmt, params![tenant, entity_id])
                    })
                    .await
            }
        };

        let rows = match direction {
            Direction::Outgoing => fetch("source_id").await,
            Direction::Incoming => fetch("target_id").await,
            Direction::Both => {
                let out = fetch("source_id").await;
                let inc = fetch("target_id").await;
                match (out, inc) {
                    (Ok(mut a), Ok(b)) => {
                        a.extend(b);
                        Ok(a)
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
        };

        let rows = match rows {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "relationship read failed, returning empty");
                return Vec::new();
            }
        };

        let mut rels: Vec<Relationship> = rows.into_iter().filter_map(row_to_relationship).collect();
        if let Some(kinds) = kinds {
            rels.retain(|r| kinds.contains(&r.kind));
        }
        rels
    }

    /// Walks edges up to `max_depth` hops, returning `(entity, via_edge)`
    /// for each reached entity (deduplicated by id). Depth 1 is a direct
    /// neighbor lookup; deeper walks expand the frontier breadth-first.
    pub async fn get_related_entities(
        &self,
        entity_manager: &crate::entity::EntityManager,
        entity_id: &str,
        kinds: Option<Vec<RelationshipKind>>,
        max_depth: usize,
        limit: usize,
    ) -> Vec<(Entity, Relationship)> {
        let mut visited = std::collections::HashSet::new();
        visited.insert(entity_id.to_string());
        let mut frontier = vec![entity_id.to_string()];
        let mut results: Vec<(Entity, Relationship)> = Vec::new();

        for _ in 0..max_depth.max(1) {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                let edges = self.get_for_entity(node, Direction::Both, kinds.clone()).await;
                for edge in edges {
                    let other_id = if edge.source_id == *node { edge.target_id.clone() } else { edge.source_id.clone() };
                    if visited.contains(&other_id) {
                        continue;
                    }
                    visited.insert(other_id.clone());
                    if let Ok(entity) = entity_manager.get(&other_id).await {
                        results.push((entity, edge));
                        if results.len() >= limit {
                            return results;
                        }
                    }
                    next_frontier.push(other_id);
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }
        results
    }

    /// Returns true if an edge was removed.
    pub async fn delete(&self, rel_id: &str) -> Result<bool> {
        let tenant = self.tenant.as_str().to_string();
        let rel_id = rel_id.to_string();
        let changed = self
            .driver
            .write(&self.tenant, move |conn| {
                conn.execute("DELETE FROM edges WHERE id = ?1 AND tenant_id = ?2", params![rel_id, tenant])
            })
            .await?;
        Ok(changed > 0)
    }

    /// Cascade-removes all edges incident to an entity (as source or
    /// target); returns the count removed.
    pub async fn delete_for_entity(&self, entity_id: &str) -> Result<usize> {
        let tenant = self.tenant.as_str().to_string();
        let entity_id = entity_id.to_string();
        let changed = self
            .driver
            .write(&self.tenant, move |conn| {
                conn.execute(
                    "DELETE FROM edges WHERE tenant_id = ?1 AND (source_id = ?2 OR target_id = ?2)",
                    params![tenant, entity_id],
                )
            })
            .await?;
        Ok(changed)
    }

    pub async fn list_all(&self, kinds: Option<Vec<RelationshipKind>>, limit: usize) -> Vec<Relationship> {
        let tenant = self.tenant.as_str().to_string();
        let rows = self
            .driver
            .read(&self.tenant, move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, source_id, target_id, kind, weight, metadata, created_at \
                     FROM edges WHERE tenant_id = ?1 ORDER BY created_at DESC",
                )?;
                crate::graph::normalize_rows(&mut stmt, params![tenant])
            })
            .await;

        let rows = match rows {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "relationship list failed, returning empty");
                return Vec::new();
            }
        };

        let mut rels: Vec<Relationship> = rows.into_iter().filter_map(row_to_relationship).collect();
        if let Some(kinds) = kinds {
            rels.retain(|r| kinds.contains(&r.kind));
        }
        rels.truncate(limit);
        rels
    }

    /// Backfill repair: for every task carrying `metadata.project_id = P`
    /// with no matching `BELONGS_TO` edge to `P`, create one. Returns the
    /// number of edges created.
    pub async fn backfill_project_edges(&self, entity_manager: &crate::entity::EntityManager) -> Result<usize> {
        let tasks = entity_manager.list_all(usize::MAX, 0, true).await?;
        let mut created = 0usize;
        for task in tasks.iter().filter(|e| e.kind == crate::entity::EntityKind::Task) {
            let Some(JsonValue::String(project_id)) = task.metadata.get("project_id") else { continue };
            let existing = self.get_for_entity(&task.id, Direction::Outgoing, Some(vec![RelationshipKind::BelongsTo])).await;
            if existing.iter().any(|e| e.target_id == *project_id) {
                continue;
            }
            let rel = Relationship::new(
                format!("rel_{}", Uuid::new_v4().simple()),
                self.tenant.as_str(),
                task.id.clone(),
                project_id.clone(),
                RelationshipKind::BelongsTo,
            );
            self.create(rel).await?;
            created += 1;
        }
        Ok(created)
    }
}

fn row_to_relationship(row: crate::graph::Row) -> Option<Relationship> {
    let get_string = |key: &str| -> Option<String> { row.get(key).and_then(|v| v.as_str()).map(String::from) };
    let metadata_json = get_string("metadata").unwrap_or_default();
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    let weight = row.get("weight").and_then(|v| v.as_f64()).unwrap_or(1.0);
    Some(Relationship {
        id: get_string("id")?,
        tenant_id: get_string("tenant_id")?,
        source_id: get_string("source_id")?,
        target_id: get_string("target_id")?,
        kind: RelationshipKind::from(get_string("kind")?.as_str()),
        weight,
        metadata,
        created_at: get_string("created_at").and_then(|s| s.parse().ok()).unwrap_or_else(Utc::now),
    })
}
