/**
 * Job Queue Types (C6)
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Registered job kinds relevant to the core. This enum covers
/// the closed set of kinds the core dispatches on; a `Job`'s wire-level
/// `kind` is kept as a plain `String` (see below) so a caller can register
/// and enqueue additional job names without a crate change, the same way
/// the job queue's `JobHandler` registry is keyed by name, not by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CrawlSource,
    SyncSource,
    RunAgentExecution,
    ResumeAgentExecution,
    CreateEntity,
    UpdateEntity,
    CreateLearningEpisode,
    GenerateStatusHint,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CrawlSource => "crawl_source",
            JobKind::SyncSource => "sync_source",
            JobKind::RunAgentExecution => "run_agent_execution",
            JobKind::ResumeAgentExecution => "resume_agent_execution",
            JobKind::CreateEntity => "create_entity",
            JobKind::UpdateEntity => "update_entity",
            JobKind::CreateLearningEpisode => "create_learning_episode",
            JobKind::GenerateStatusHint => "generate_status_hint",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Queued,
        }
    }
}

/// One row in the durable job table. At-least-once delivery: a job may be
/// claimed more than once (e.g. after a worker crash mid-run) so handlers
/// must be idempotent under the keys they write. `kind` is the
/// job name a handler is registered under; it is usually one of
/// `JobKind`'s values but is kept as a plain string so callers can extend
/// the registry without a crate change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub kind: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-queue execution limits: timeouts per queue, default 1h is
/// appropriate for crawls; concurrent jobs per worker are bounded, default 3.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub job_timeout: std::time::Duration,
    pub max_concurrent: usize,
    pub max_attempts: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            job_timeout: std::time::Duration::from_secs(60 * 60),
            max_concurrent: 3,
            max_attempts: 3,
        }
    }
}
