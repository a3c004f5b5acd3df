/**
 * Job Queue (C6)
 *
 * DESIGN DECISION: One `JobQueue` per tenant, same binding-at-construction
 * discipline as `EntityManager`/`RelationshipManager`.
 * WHY: Jobs are tenant data; a worker that pulls across tenants holds one
 * `JobQueue` per tenant it services rather than a single queue that takes
 * a tenant parameter per call (§9 design note: explicit dependency passing
 * over global singletons).
 */
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::graph::GraphDriver;
use crate::tenant::TenantId;

use super::types::{Job, JobStatus};

pub struct JobQueue {
    driver: Arc<GraphDriver>,
    tenant: TenantId,
}

impl JobQueue {
    pub fn new(driver: Arc<GraphDriver>, tenant: TenantId) -> Self {
        Self { driver, tenant }
    }

    /// Enqueues a job, returning its id. Callers that need idempotent
    /// retries should pass a caller-chosen `id` (e.g. derived from the
    /// entity id the job will act on) via `enqueue_with_id`.
    pub async fn enqueue(&self, kind: &str, payload: JsonValue) -> Result<String> {
        self.enqueue_with_id(uuid::Uuid::new_v4().to_string(), kind, payload).await
    }

    pub async fn enqueue_with_id(&self, id: String, kind: &str, payload: JsonValue) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let tenant = self.tenant.as_str().to_string();
        let kind = kind.to_string();
        let payload_str = serde_json::to_string(&payload)?;
        let job_id = id.clone();

        self.driver
            .write(&self.tenant, move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, tenant_id, kind, payload, status, attempts, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6) \
                     ON CONFLICT(id) DO NOTHING",
                    params![id, tenant, kind, payload_str, JobStatus::Queued.as_str(), now],
                )
            })
            .await?;
        Ok(job_id)
    }

    /// Claims the oldest queued job whose kind is in `kinds` (or any kind
    /// if empty), marking it `Running` and bumping its attempt counter.
    /// Returns `None` if nothing is queued.
    pub async fn claim_next(&self, kinds: &[String]) -> Result<Option<Job>> {
        let tenant = self.tenant.as_str().to_string();
        let kinds = kinds.to_vec();
        let now = Utc::now().to_rfc3339();

        self.driver
            .transaction(&self.tenant, move |tx| {
                let row: Option<(String, String, String, u32)> = if kinds.is_empty() {
                    tx.query_row(
                        "SELECT id, kind, payload, attempts FROM jobs \
                         WHERE tenant_id = ?1 AND status = 'queued' ORDER BY created_at ASC LIMIT 1",
                        params![tenant],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?
                } else {
                    let placeholders = kinds.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                    let sql = format!(
                        "SELECT id, kind, payload, attempts FROM jobs \
                         WHERE tenant_id = ? AND status = 'queued' AND kind IN ({placeholders}) \
                         ORDER BY created_at ASC LIMIT 1"
                    );
                    let mut stmt = tx.prepare(&sql)?;
                    let mut bind: Vec<&dyn rusqlite::ToSql> = vec![&tenant];
                    for k in &kinds {
                        bind.push(k);
                    }
                    stmt.query_row(bind.as_slice(), |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
                        .optional()?
                };

                let Some((id, kind, payload, attempts)) = row else {
                    return Ok(None);
                };

                tx.execute(
                    "UPDATE jobs SET status = 'running', attempts = ?1, updated_at = ?2 WHERE id = ?3",
                    params![attempts + 1, now, id],
                )?;

                let payload: JsonValue = serde_json::from_str(&payload).unwrap_or(JsonValue::Null);
                Ok(Some(Job {
                    id,
                    tenant_id: tenant.clone(),
                    kind,
                    payload,
                    status: JobStatus::Running,
                    attempts: attempts + 1,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                }))
            })
            .await
    }

    pub async fn complete(&self, job_id: &str) -> Result<()> {
        self.set_status(job_id, JobStatus::Completed).await
    }

    /// Marks a job failed. The spec requires at-least-once delivery with
    /// idempotent retries rather than durable exactly-once semantics, so
    /// failure here does not automatically requeue; the worker decides
    /// (per `QueueLimits::max_attempts`) whether to re-enqueue a fresh job.
    pub async fn fail(&self, job_id: &str) -> Result<()> {
        self.set_status(job_id, JobStatus::Failed).await
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let job_id = job_id.to_string();
        let rows = self
            .driver
            .write(&self.tenant, move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now, job_id],
                )
            })
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Job> {
        let tenant = self.tenant.as_str().to_string();
        let job_id = job_id.to_string();
        self.driver
            .read(&self.tenant, move |conn| {
                conn.query_row(
                    "SELECT id, tenant_id, kind, payload, status, attempts, created_at, updated_at \
                     FROM jobs WHERE id = ?1 AND tenant_id = ?2",
                    params![job_id, tenant],
                    row_to_job,
                )
            })
            .await
    }

    pub async fn requeue(&self, job_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let job_id = job_id.to_string();
        let rows = self
            .driver
            .write(&self.tenant, move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = 'queued', updated_at = ?1 WHERE id = ?2",
                    params![now, job_id],
                )
            })
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    pub async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>> {
        let tenant = self.tenant.as_str().to_string();
        let status_str = status.as_str().to_string();
        self.driver
            .read(&self.tenant, move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, kind, payload, status, attempts, created_at, updated_at \
                     FROM jobs WHERE tenant_id = ?1 AND status = ?2 ORDER BY created_at ASC LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![tenant, status_str, limit as i64], row_to_job)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(rows)
            })
            .await
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let payload_str: String = row.get(3)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;
    Ok(Job {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        kind: row.get(2)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(JsonValue::Null),
        status: JobStatus::from(row.get::<_, String>(4)?.as_str()),
        attempts: row.get::<_, i64>(5)? as u32,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn queue(dir: &std::path::Path) -> JobQueue {
        JobQueue::new(Arc::new(GraphDriver::new(dir)), TenantId::new("acme"))
    }

    #[tokio::test]
    async fn test_enqueue_and_claim() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue("run_agent_execution", json!({"agent_id": "a1"})).await.unwrap();

        let job = q.claim_next(&[]).await.unwrap().unwrap();
        assert_eq!(job.kind, "run_agent_execution");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);

        assert!(q.claim_next(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_filters_by_kind() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue("crawl_source", json!({})).await.unwrap();
        q.enqueue("run_agent_execution", json!({})).await.unwrap();

        let job = q.claim_next(&["run_agent_execution".to_string()]).await.unwrap().unwrap();
        assert_eq!(job.kind, "run_agent_execution");
    }

    #[tokio::test]
    async fn test_enqueue_with_id_is_idempotent() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue_with_id("job_1".into(), "create_entity", json!({})).await.unwrap();
        q.enqueue_with_id("job_1".into(), "create_entity", json!({})).await.unwrap();

        let queued = q.list_by_status(JobStatus::Queued, 10).await.unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_and_fail_transitions() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue_with_id("job_1".into(), "create_entity", json!({})).await.unwrap();
        q.claim_next(&[]).await.unwrap();
        q.complete("job_1").await.unwrap();
        assert_eq!(q.get("job_1").await.unwrap().status, JobStatus::Completed);

        q.enqueue_with_id("job_2".into(), "create_entity", json!({})).await.unwrap();
        q.claim_next(&[]).await.unwrap();
        q.fail("job_2").await.unwrap();
        assert_eq!(q.get("job_2").await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_requeue_after_failure() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue_with_id("job_1".into(), "create_entity", json!({})).await.unwrap();
        q.claim_next(&[]).await.unwrap();
        q.fail("job_1").await.unwrap();
        q.requeue("job_1").await.unwrap();

        let job = q.claim_next(&[]).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
    }
}
