/**
 * Entity Manager (C2)
 *
 * DESIGN DECISION: One manager instance is bound to exactly one tenant at
 * construction, so no method signature below takes a tenant parameter and
 * no caller can accidentally cross tenants by passing the wrong one.
 * WHY: Per the data model invariant, no query ever crosses tenants; binding
 * the tenant at construction makes that a type-level guarantee rather than
 * a per-call discipline.
 *
 * Every write that touches both the generic node row and its structured
 * properties goes through `GraphDriver::transaction` so the two writes
 * land atomically (spec's "one write" language, §4.2).
 */
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{Error, Result};
use crate::graph::GraphDriver;
use crate::tenant::TenantId;

use super::collaborators::{Embedder, ExtractionCollaborator, NoopExtractionCollaborator, NullEmbedder};
use super::properties::{merge_into_metadata, metadata_with_body, project_structured};
use super::sanitize::{sanitize_episode_body, sanitize_query};
use super::types::{Entity, EntityKind, EntityUpdate, Metadata};

/// Precedence order for "most actionable" task selection in
/// `get_project_summary`.
const ACTIONABLE_STATUS_ORDER: &[&str] = &["doing", "blocked", "review"];
const CRITICAL_PRIORITIES: &[&str] = &["critical", "high"];
const TERMINAL_STATUSES: &[&str] = &["done", "archived"];

#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub project_id: Option<String>,
    pub epic_id: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub complexity: Option<String>,
    pub feature: Option<String>,
    pub tags_any_of: Vec<String>,
    pub include_archived: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EpicProgress {
    pub epic_id: String,
    pub status_counts: BTreeMap<String, i64>,
    pub completion_pct: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub status_counts: BTreeMap<String, i64>,
    pub most_actionable: Vec<Entity>,
    pub critical: Vec<Entity>,
    pub top_epics: Vec<EpicProgress>,
    pub generated_at: chrono::DateTime<Utc>,
}

pub struct EntityManager {
    driver: Arc<GraphDriver>,
    tenant: TenantId,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn ExtractionCollaborator>,
    /// Set via `with_relationships` so epic-scoped listing can walk the
    /// `BELONGS_TO` edge (spec §4.2) instead of trusting the `epic_id`
    /// property alone. `None` in tests/callers that don't wire a
    /// `RelationshipManager` falls back to the property check.
    relationships: Option<Arc<crate::relationship::RelationshipManager>>,
}

impl EntityManager {
    pub fn new(driver: Arc<GraphDriver>, tenant: TenantId) -> Self {
        Self {
            driver,
            tenant,
            embedder: Arc::new(NullEmbedder),
            extractor: Arc::new(NoopExtractionCollaborator),
            relationships: None,
        }
    }

    pub fn with_collaborators(
        driver: Arc<GraphDriver>,
        tenant: TenantId,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn ExtractionCollaborator>,
    ) -> Self {
        Self { driver, tenant, embedder, extractor, relationships: None }
    }

    /// Wires a `RelationshipManager` over the same tenant so epic-scoped
    /// reads can walk `BELONGS_TO` edges per spec §4.2.
    pub fn with_relationships(mut self, relationships: Arc<crate::relationship::RelationshipManager>) -> Self {
        self.relationships = Some(relationships);
        self
    }

    fn tenant_id(&self) -> &str {
        self.tenant.as_str()
    }

    /// "Extraction path": persists the entity then lets the extraction
    /// collaborator discover implicit related entities/edges. The caller's
    /// id is always what's stored, even though the collaborator sees a
    /// clone of the entity and could assign its own transient id
    /// internally — we never read that id back.
    pub async fn create(&self, entity: Entity) -> Result<String> {
        let id = self.persist_new(&entity).await?;
        if let Err(e) = self.extractor.extract(&entity).await {
            warn!(error = %e, entity_id = %id, "extraction collaborator failed, continuing without enrichment");
        }
        Ok(id)
    }

    /// "Fast path": persists the entity with no extraction. Embedding
    /// generation is best-effort and never fails the create.
    pub async fn create_direct(&self, mut entity: Entity, generate_embedding: bool) -> Result<String> {
        if generate_embedding {
            let text = entity.embedding_source_text();
            match self.embedder.embed(&text).await {
                Ok(vec) => entity.name_embedding = Some(vec),
                Err(e) => warn!(error = %e, "embedding generation failed, continuing without it"),
            }
        }
        self.persist_new(&entity).await
    }

    async fn persist_new(&self, entity: &Entity) -> Result<String> {
        if self.get(&entity.id).await.is_ok() {
            return Err(Error::ConflictOrDuplicate(format!(
                "entity {} already exists",
                entity.id
            )));
        }

        let structured = project_structured(entity);
        let metadata = merge_into_metadata(&metadata_with_body(entity), &structured);
        let metadata_json = serde_json::to_string(&metadata)?;
        let structured_json = serde_json::to_string(&structured)?;

        let id = entity.id.clone();
        let tenant = self.tenant_id().to_string();
        let kind = entity.kind.as_str().to_string();
        let name = entity.name.clone();
        let embedding_json = match &entity.name_embedding {
            Some(vec) => Some(serde_json::to_string(vec)?),
            None => None,
        };
        let created_at = entity.created_at.to_rfc3339();
        let updated_at = entity.updated_at.to_rfc3339();

        self.driver
            .transaction(&self.tenant, move |tx| {
                tx.execute(
                    "INSERT INTO nodes (id, tenant_id, kind, name, metadata, structured, name_embedding, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![id, tenant, kind, name, metadata_json, structured_json, embedding_json, created_at, updated_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(entity.id.clone())
    }

    /// Looks up by id, verifying tenant ownership. A node under another
    /// tenant is treated as not found (defense in depth, per C1).
    pub async fn get(&self, id: &str) -> Result<Entity> {
        let tenant = self.tenant_id().to_string();
        let id = id.to_string();
        let row = self
            .driver
            .read(&self.tenant, move |conn| {
                conn.query_row(
                    "SELECT id, tenant_id, kind, name, metadata, structured, name_embedding, created_at, updated_at \
                     FROM nodes WHERE id = ?1 AND tenant_id = ?2",
                    params![id, tenant],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, String>(7)?,
                            row.get::<_, String>(8)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        let (id, tenant_id, kind, name, metadata_json, structured_json, embedding_json, created_at, updated_at) =
            row.ok_or_else(|| Error::NotFound(format!("entity {id} not found")))?;

        row_to_entity(id, tenant_id, kind, name, metadata_json, structured_json, embedding_json, created_at, updated_at)
    }

    /// Merges metadata, overwrites structured fields present in `updates`,
    /// refreshes `updated_at`. `embedding` is handled separately so it
    /// never leaks into metadata.
    pub async fn update(&self, id: &str, updates: EntityUpdate) -> Result<Entity> {
        let mut entity = self.get(id).await?;

        if let Some(name) = updates.name {
            entity.name = name;
        }
        if let Some(description) = updates.description {
            entity.description = Some(description);
        }
        if let Some(content) = updates.content {
            entity.content = Some(content);
        }
        if let Some(metadata) = updates.metadata {
            for (k, v) in metadata {
                entity.metadata.insert(k, v);
            }
        }
        if let Some(structured) = updates.structured {
            for (k, v) in structured {
                entity.structured.insert(k, v);
            }
        }
        if let Some(embedding) = updates.embedding {
            entity.name_embedding = embedding;
        }
        entity.updated_at = Utc::now();

        let structured = project_structured(&entity);
        let metadata = merge_into_metadata(&metadata_with_body(&entity), &structured);
        let metadata_json = serde_json::to_string(&metadata)?;
        let structured_json = serde_json::to_string(&structured)?;

        let id = entity.id.clone();
        let tenant = self.tenant_id().to_string();
        let name = entity.name.clone();
        let embedding_json = match &entity.name_embedding {
            Some(vec) => Some(serde_json::to_string(vec)?),
            None => None,
        };
        let updated_at = entity.updated_at.to_rfc3339();

        let changed = self
            .driver
            .write(&self.tenant, move |conn| {
                conn.execute(
                    "UPDATE nodes SET name = ?1, metadata = ?2, structured = ?3, name_embedding = ?4, updated_at = ?5 \
                     WHERE id = ?6 AND tenant_id = ?7",
                    params![name, metadata_json, structured_json, embedding_json, updated_at, id, tenant],
                )
            })
            .await?;

        if changed == 0 {
            return Err(Error::NotFound(format!("entity {} not found", entity.id)));
        }
        Ok(entity)
    }

    /// Deletes the entity. Fails with NotFound if it didn't exist under
    /// this tenant.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let tenant = self.tenant_id().to_string();
        let id_owned = id.to_string();
        let changed = self
            .driver
            .write(&self.tenant, move |conn| {
                conn.execute(
                    "DELETE FROM nodes WHERE id = ?1 AND tenant_id = ?2",
                    params![id_owned, tenant],
                )
            })
            .await?;

        if changed == 0 {
            return Err(Error::NotFound(format!("entity {id} not found")));
        }
        Ok(())
    }

    /// Hybrid retrieval: sanitizes the query, then scores every candidate
    /// node (within tenant and optional kind filter) by a simple
    /// reciprocal-rank fusion of keyword containment and name-embedding
    /// cosine similarity. Returns `(entity, score)` descending.
    ///
    /// This crate has no full-text engine or vector index underneath it
    /// (SQLite stands in for the external graph store); fusion happens in
    /// application code over the tenant's full node set, which is
    /// appropriate at the scale this crate targets.
    pub async fn search(&self, query: &str, kinds: Option<Vec<EntityKind>>, limit: usize) -> Result<Vec<(Entity, f64)>> {
        let sanitized = sanitize_query(query);
        let terms: Vec<String> = sanitized
            .split_whitespace()
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let all = self.list_all(usize::MAX, 0, true).await?;
        let kind_filter = kinds;

        let query_embedding = if terms.is_empty() {
            None
        } else {
            self.embedder.embed(&sanitized).await.ok()
        };

        let mut keyword_ranked: Vec<(usize, f64)> = all
            .iter()
            .enumerate()
            .filter(|(_, e)| kind_filter.as_ref().map_or(true, |ks| ks.contains(&e.kind)))
            .map(|(i, e)| {
                let haystack = format!(
                    "{} {} {}",
                    e.name.to_lowercase(),
                    e.description.clone().unwrap_or_default().to_lowercase(),
                    e.content.as_deref().map(sanitize_episode_body).unwrap_or_default().to_lowercase()
                );
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (i, hits as f64)
            })
            .collect();
        keyword_ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        let mut vector_ranked: Vec<(usize, f64)> = all
            .iter()
            .enumerate()
            .filter(|(_, e)| kind_filter.as_ref().map_or(true, |ks| ks.contains(&e.kind)))
            .map(|(i, e)| {
                let score = match (&query_embedding, &e.name_embedding) {
                    (Some(q), Some(v)) => cosine_similarity(q, v),
                    _ => 0.0,
                };
                (i, score)
            })
            .collect();
        vector_ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        const RRF_K: f64 = 60.0;
        let mut fused: BTreeMap<usize, f64> = BTreeMap::new();
        for (rank, (idx, _)) in keyword_ranked.iter().enumerate() {
            *fused.entry(*idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }
        for (rank, (idx, _)) in vector_ranked.iter().enumerate() {
            *fused.entry(*idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }

        let mut scored: Vec<(Entity, f64)> = fused
            .into_iter()
            .map(|(idx, score)| (all[idx].clone(), score))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(limit);
        Ok(scored)
    }

    pub async fn list_by_type(&self, kind: EntityKind, limit: usize, offset: usize, filters: ListFilters) -> Result<Vec<Entity>> {
        let kind_str = kind.as_str().to_string();
        let tenant = self.tenant_id().to_string();
        let rows = self
            .driver
            .read(&self.tenant, move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, kind, name, metadata, structured, name_embedding, created_at, updated_at \
                     FROM nodes WHERE tenant_id = ?1 AND kind = ?2 ORDER BY updated_at DESC",
                )?;
                crate::graph::normalize_rows(&mut stmt, params![tenant, kind_str])
            })
            .await?;

        let mut entities: Vec<Entity> = rows.into_iter().filter_map(|r| row_to_entity_from_map(r).ok()).collect();

        // Epic membership: per spec §4.2, walk the BELONGS_TO edge when an
        // epic is supplied and a RelationshipManager is wired in; only fall
        // back to the epic_id property when neither is available.
        let epic_member_ids: Option<std::collections::HashSet<String>> = match (&filters.epic_id, &self.relationships) {
            (Some(epic_id), Some(rels)) => {
                let edges = rels
                    .get_for_entity(epic_id, crate::relationship::Direction::Incoming, Some(vec![crate::relationship::RelationshipKind::BelongsTo]))
                    .await;
                Some(edges.into_iter().map(|e| e.source_id).collect())
            }
            _ => None,
        };

        entities.retain(|e| {
            if !filters.include_archived {
                if let Some(JsonValue::String(s)) = e.metadata.get("status") {
                    if s == "archived" {
                        return false;
                    }
                }
            }
            if let Some(project_id) = &filters.project_id {
                if metadata_str(e, "project_id").as_deref() != Some(project_id.as_str()) {
                    return false;
                }
            }
            if let Some(epic_id) = &filters.epic_id {
                match &epic_member_ids {
                    Some(ids) => {
                        if !ids.contains(&e.id) {
                            return false;
                        }
                    }
                    None => {
                        if metadata_str(e, "epic_id").as_deref() != Some(epic_id.as_str()) {
                            return false;
                        }
                    }
                }
            }
            if let Some(status) = &filters.status {
                if metadata_str(e, "status").as_deref() != Some(status.as_str()) {
                    return false;
                }
            }
            if let Some(priority) = &filters.priority {
                if metadata_str(e, "priority").as_deref() != Some(priority.as_str()) {
                    return false;
                }
            }
            if let Some(complexity) = &filters.complexity {
                if metadata_str(e, "complexity").as_deref() != Some(complexity.as_str()) {
                    return false;
                }
            }
            if let Some(feature) = &filters.feature {
                if metadata_str(e, "feature").as_deref() != Some(feature.as_str()) {
                    return false;
                }
            }
            if !filters.tags_any_of.is_empty() {
                let tags: Vec<String> = e
                    .metadata
                    .get("tags")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|t| t.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                if !filters.tags_any_of.iter().any(|t| tags.contains(t)) {
                    return false;
                }
            }
            true
        });

        Ok(entities.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn list_all(&self, limit: usize, offset: usize, include_archived: bool) -> Result<Vec<Entity>> {
        let tenant = self.tenant_id().to_string();
        let rows = self
            .driver
            .read(&self.tenant, move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, kind, name, metadata, structured, name_embedding, created_at, updated_at \
                     FROM nodes WHERE tenant_id = ?1 ORDER BY updated_at DESC",
                )?;
                crate::graph::normalize_rows(&mut stmt, params![tenant])
            })
            .await?;

        let mut entities: Vec<Entity> = rows.into_iter().filter_map(|r| row_to_entity_from_map(r).ok()).collect();
        if !include_archived {
            entities.retain(|e| metadata_str(e, "status").as_deref() != Some("archived"));
        }
        Ok(entities.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn get_tasks_for_epic(&self, epic_id: &str, status: Option<String>, limit: usize) -> Result<Vec<Entity>> {
        let filters = ListFilters {
            epic_id: Some(epic_id.to_string()),
            status,
            include_archived: false,
            ..Default::default()
        };
        self.list_by_type(EntityKind::Task, limit, 0, filters).await
    }

    pub async fn get_epic_progress(&self, epic_id: &str) -> Result<EpicProgress> {
        let tasks = self.get_tasks_for_epic(epic_id, None, usize::MAX).await?;
        let mut status_counts: BTreeMap<String, i64> = BTreeMap::new();
        for t in &tasks {
            let status = metadata_str(t, "status").unwrap_or_else(|| "unknown".to_string());
            *status_counts.entry(status).or_insert(0) += 1;
        }
        let total = tasks.len() as f64;
        let done = *status_counts.get("done").unwrap_or(&0) as f64;
        let completion_pct = if total > 0.0 { (done / total) * 100.0 } else { 0.0 };
        Ok(EpicProgress { epic_id: epic_id.to_string(), status_counts, completion_pct })
    }

    /// Curated project snapshot: status counts, most-actionable tasks,
    /// critical tasks, and top epics with progress. Tie-breaks fall back
    /// to most-recent `updated_at` (list_by_type already sorts that way).
    pub async fn get_project_summary(
        &self,
        project_id: &str,
        actionable_limit: usize,
        critical_limit: usize,
        epic_limit: usize,
    ) -> Result<ProjectSummary> {
        let filters = ListFilters { project_id: Some(project_id.to_string()), include_archived: false, ..Default::default() };
        let tasks = self.list_by_type(EntityKind::Task, usize::MAX, 0, filters).await?;

        let mut status_counts: BTreeMap<String, i64> = BTreeMap::new();
        for t in &tasks {
            let status = metadata_str(t, "status").unwrap_or_else(|| "unknown".to_string());
            *status_counts.entry(status).or_insert(0) += 1;
        }

        let mut actionable: Vec<&Entity> = tasks.iter().collect();
        actionable.sort_by_key(|t| {
            let status = metadata_str(t, "status").unwrap_or_default();
            ACTIONABLE_STATUS_ORDER
                .iter()
                .position(|s| *s == status)
                .unwrap_or(ACTIONABLE_STATUS_ORDER.len())
        });
        let most_actionable: Vec<Entity> = actionable.into_iter().take(actionable_limit).cloned().collect();

        let critical: Vec<Entity> = tasks
            .iter()
            .filter(|t| {
                let priority = metadata_str(t, "priority").unwrap_or_default();
                let status = metadata_str(t, "status").unwrap_or_default();
                CRITICAL_PRIORITIES.contains(&priority.as_str()) && !TERMINAL_STATUSES.contains(&status.as_str())
            })
            .take(critical_limit)
            .cloned()
            .collect();

        let epics = self
            .list_by_type(
                EntityKind::Epic,
                epic_limit,
                0,
                ListFilters { project_id: Some(project_id.to_string()), include_archived: false, ..Default::default() },
            )
            .await?;
        let mut top_epics = Vec::with_capacity(epics.len());
        for epic in &epics {
            top_epics.push(self.get_epic_progress(&epic.id).await?);
        }

        Ok(ProjectSummary {
            project_id: project_id.to_string(),
            status_counts,
            most_actionable,
            critical,
            top_epics,
            generated_at: Utc::now(),
        })
    }

    /// Skips extraction and embedding generation for every entity in the
    /// batch. Individual failures are counted, not propagated.
    pub async fn bulk_create_direct(&self, entities: Vec<Entity>, batch_size: usize) -> Result<(usize, usize)> {
        let mut created = 0usize;
        let mut failed = 0usize;
        for chunk in entities.chunks(batch_size.max(1)) {
            for entity in chunk {
                match self.persist_new(entity).await {
                    Ok(_) => created += 1,
                    Err(e) => {
                        warn!(error = %e, entity_id = %entity.id, "bulk create failed for entity");
                        failed += 1;
                    }
                }
            }
        }
        Ok((created, failed))
    }
}

fn metadata_str(entity: &Entity, key: &str) -> Option<String> {
    entity.metadata.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn row_to_entity(
    id: String,
    tenant_id: String,
    kind: String,
    name: String,
    metadata_json: String,
    structured_json: String,
    embedding_json: Option<String>,
    created_at: String,
    updated_at: String,
) -> Result<Entity> {
    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    let structured: Metadata = serde_json::from_str(&structured_json).unwrap_or_default();
    let name_embedding: Option<Vec<f32>> = embedding_json.and_then(|s| serde_json::from_str(&s).ok());

    Ok(Entity {
        id,
        tenant_id,
        kind: EntityKind::from(kind.as_str()),
        name,
        description: metadata.get("description").and_then(|v| v.as_str()).map(String::from),
        content: metadata.get("content").and_then(|v| v.as_str()).map(String::from),
        metadata,
        structured,
        name_embedding,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_entity_from_map(row: crate::graph::Row) -> Result<Entity> {
    let get_string = |key: &str| -> String {
        row.get(key).and_then(|v| v.as_str()).map(String::from).unwrap_or_default()
    };
    let embedding_json = row.get("name_embedding").and_then(|v| v.as_str()).map(String::from);
    row_to_entity(
        get_string("id"),
        get_string("tenant_id"),
        get_string("kind"),
        get_string("name"),
        get_string("metadata"),
        get_string("structured"),
        embedding_json,
        get_string("created_at"),
        get_string("updated_at"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path, tenant: &str) -> EntityManager {
        let driver = Arc::new(GraphDriver::new(dir));
        EntityManager::new(driver, TenantId::new(tenant))
    }

    #[tokio::test]
    async fn test_create_direct_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let mut e = Entity::new("task_1", "acme", EntityKind::Task, "Write tests");
        e.structured.insert("status".to_string(), JsonValue::String("doing".to_string()));
        mgr.create_direct(e, false).await.unwrap();

        let fetched = mgr.get("task_1").await.unwrap();
        assert_eq!(fetched.name, "Write tests");
        assert_eq!(fetched.metadata.get("status").unwrap(), "doing");
    }

    #[tokio::test]
    async fn test_duplicate_create_is_conflict() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let e = Entity::new("task_1", "acme", EntityKind::Task, "first");
        mgr.create_direct(e.clone(), false).await.unwrap();
        let err = mgr.create_direct(e, false).await.unwrap_err();
        assert!(matches!(err, Error::ConflictOrDuplicate(_)));
    }

    #[tokio::test]
    async fn test_tenant_isolation_on_get() {
        let dir = tempdir().unwrap();
        let acme = manager(dir.path(), "acme");
        let other = manager(dir.path(), "other");
        let e = Entity::new("task_1", "acme", EntityKind::Task, "private");
        acme.create_direct(e, false).await.unwrap();

        let err = other.get("task_1").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_merges_metadata_and_bumps_updated_at() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let e = Entity::new("task_1", "acme", EntityKind::Task, "first");
        let created_at = e.updated_at;
        mgr.create_direct(e, false).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut updates = EntityUpdate::default();
        let mut structured = Metadata::new();
        structured.insert("status".to_string(), JsonValue::String("done".to_string()));
        updates.structured = Some(structured);
        let updated = mgr.update("task_1", updates).await.unwrap();

        assert_eq!(updated.metadata.get("status").unwrap(), "done");
        assert!(updated.updated_at > created_at);
    }

    #[tokio::test]
    async fn test_delete_missing_entity_is_not_found() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let err = mgr.delete("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_search_matches_by_keyword() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let mut e = Entity::new("task_1", "acme", EntityKind::Task, "Fix retry logic");
        e.description = Some("handles transient errors".to_string());
        mgr.create_direct(e, false).await.unwrap();

        let results = mgr.search("retry", None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "task_1");
    }

    #[tokio::test]
    async fn test_get_epic_progress_counts_statuses() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        for (i, status) in ["done", "done", "doing"].iter().enumerate() {
            let mut t = Entity::new(format!("task_{i}"), "acme", EntityKind::Task, format!("t{i}"));
            t.structured.insert("epic_id".to_string(), JsonValue::String("epic_1".to_string()));
            t.structured.insert("status".to_string(), JsonValue::String(status.to_string()));
            mgr.create_direct(t, false).await.unwrap();
        }

        let progress = mgr.get_epic_progress("epic_1").await.unwrap();
        assert_eq!(progress.status_counts.get("done"), Some(&2));
        assert!((progress.completion_pct - 66.66).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_bulk_create_direct_counts_failures() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let entities = vec![
            Entity::new("dup", "acme", EntityKind::Note, "a"),
            Entity::new("dup", "acme", EntityKind::Note, "b"),
            Entity::new("unique", "acme", EntityKind::Note, "c"),
        ];
        let (created, failed) = mgr.bulk_create_direct(entities, 100).await.unwrap();
        assert_eq!(created, 2);
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_description_and_content_round_trip_through_create_and_update() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let mut e = Entity::new("doc_1", "acme", EntityKind::Note, "Crawled page");
        e.description = Some("a short summary".to_string());
        e.content = Some("the full page body".to_string());
        mgr.create_direct(e, false).await.unwrap();

        let fetched = mgr.get("doc_1").await.unwrap();
        assert_eq!(fetched.description.as_deref(), Some("a short summary"));
        assert_eq!(fetched.content.as_deref(), Some("the full page body"));

        let updated = mgr
            .update("doc_1", EntityUpdate { description: Some("revised summary".to_string()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("revised summary"));
        assert_eq!(updated.content.as_deref(), Some("the full page body"));
    }

    #[tokio::test]
    async fn test_search_matches_entity_content() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let mut e = Entity::new("doc_1", "acme", EntityKind::Note, "Untitled");
        e.content = Some("**retry** logic lives in the `queue` module".to_string());
        mgr.create_direct(e, false).await.unwrap();

        let results = mgr.search("retry", None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "doc_1");
    }

    #[tokio::test]
    async fn test_list_by_type_epic_filter_walks_belongs_to_edge() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(GraphDriver::new(dir.path()));
        let tenant = TenantId::new("acme");
        let relationships = Arc::new(crate::relationship::RelationshipManager::new(driver.clone(), tenant.clone()));
        let mgr = EntityManager::new(driver, tenant.clone()).with_relationships(relationships.clone());

        mgr.create_direct(Entity::new("epic_1", "acme", EntityKind::Epic, "Epic One"), false).await.unwrap();
        mgr.create_direct(Entity::new("epic_2", "acme", EntityKind::Epic, "Epic Two"), false).await.unwrap();
        mgr.create_direct(Entity::new("task_1", "acme", EntityKind::Task, "In epic 1"), false).await.unwrap();
        mgr.create_direct(Entity::new("task_2", "acme", EntityKind::Task, "In epic 2"), false).await.unwrap();

        relationships
            .create(crate::relationship::Relationship::new("r1", "acme", "task_1", "epic_1", crate::relationship::RelationshipKind::BelongsTo))
            .await
            .unwrap();
        relationships
            .create(crate::relationship::Relationship::new("r2", "acme", "task_2", "epic_2", crate::relationship::RelationshipKind::BelongsTo))
            .await
            .unwrap();

        let filters = ListFilters { epic_id: Some("epic_1".to_string()), ..Default::default() };
        let tasks = mgr.list_by_type(EntityKind::Task, 10, 0, filters).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "task_1");
    }

    #[tokio::test]
    async fn test_list_by_type_epic_filter_falls_back_to_property_without_relationships() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path(), "acme");
        let mut t1 = Entity::new("task_1", "acme", EntityKind::Task, "In epic 1");
        t1.structured.insert("epic_id".to_string(), JsonValue::String("epic_1".to_string()));
        mgr.create_direct(t1, false).await.unwrap();
        let mut t2 = Entity::new("task_2", "acme", EntityKind::Task, "In epic 2");
        t2.structured.insert("epic_id".to_string(), JsonValue::String("epic_2".to_string()));
        mgr.create_direct(t2, false).await.unwrap();

        let filters = ListFilters { epic_id: Some("epic_1".to_string()), ..Default::default() };
        let tasks = mgr.list_by_type(EntityKind::Task, 10, 0, filters).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "task_1");
    }
}
