/**
 * Sibyl Worker
 *
 * The worker process role from spec §5: pulls jobs from the per-tenant
 * `JobQueue` (C6) and dispatches them to handlers that drive the Agent
 * Runner (C7) and Crawler Pipeline (C8). It never talks to API consumers
 * directly — everything it needs to signal back goes through the message
 * bus (C4), which the handlers it wraps publish to.
 *
 * The LLM agent runtime is an external collaborator this crate does not
 * ship (spec §1); `UnconfiguredAgentRuntime` below is a placeholder that
 * fails loudly so a host application notices it needs to supply a real
 * one before agent-execution jobs can run. Crawl jobs work end to end
 * against `DirectCrawlerPipeline` once a caller supplies fetched pages.
 */
use std::sync::Arc;

use async_trait::async_trait;
use sibyl_core::{
    AgentRunner, AgentRuntime, ApprovalService, ConfigLoader, ConfigValidator, DestructiveCommandMatcher, Error, ExternalApiMatcher,
    FileWriteMatcher, GraphDriver, Job, JobHandler, MessageBus, PubSub, QueueLimits, RelationshipManager, Result, RuntimeStream, TenantId,
    ToolCallMatcher, UserQuestionMatcher, Worker,
};
use sibyl_core::entity::EntityManager;
use sibyl_core::queue::JobQueue;
use regex::Regex;
use tracing::{error, info};

struct UnconfiguredAgentRuntime;

#[async_trait]
impl AgentRuntime for UnconfiguredAgentRuntime {
    async fn start(&self, _prompt: &str) -> Result<Box<dyn RuntimeStream>> {
        Err(Error::Fatal("no agent runtime configured for this worker".to_string()))
    }

    async fn resume(&self, _session_id: &str, _prompt: &str) -> Result<Box<dyn RuntimeStream>> {
        Err(Error::Fatal("no agent runtime configured for this worker".to_string()))
    }
}

struct RunAgentExecutionHandler {
    runner: Arc<AgentRunner>,
}

#[async_trait]
impl JobHandler for RunAgentExecutionHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        let agent_id = job.payload.get("agent_id").and_then(|v| v.as_str()).ok_or_else(|| Error::InvalidInput("job missing agent_id".to_string()))?;
        let prompt = job.payload.get("prompt").and_then(|v| v.as_str()).unwrap_or("");
        let agent_type = job.payload.get("agent_type").and_then(|v| v.as_str()).unwrap_or("general");
        let project_id = job.payload.get("project_id").and_then(|v| v.as_str());
        let task_id = job.payload.get("task_id").and_then(|v| v.as_str());
        self.runner.spawn(agent_id, prompt, agent_type, project_id, task_id).await
    }
}

struct ResumeAgentExecutionHandler {
    runner: Arc<AgentRunner>,
}

#[async_trait]
impl JobHandler for ResumeAgentExecutionHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        let agent_id = job.payload.get("agent_id").and_then(|v| v.as_str()).ok_or_else(|| Error::InvalidInput("job missing agent_id".to_string()))?;
        let prompt = job.payload.get("prompt").and_then(|v| v.as_str()).unwrap_or("");
        self.runner.resume_agent(agent_id, prompt).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config_path = std::env::var("SIBYL_CONFIG_PATH").ok().map(std::path::PathBuf::from);
    let config = ConfigLoader::load(config_path.as_deref())?;
    if let Err(issues) = ConfigValidator::validate(&config) {
        for issue in &issues {
            error!(field = issue.field, message = %issue.message, "invalid configuration");
        }
        return Err(Error::InvalidInput("configuration failed validation".to_string()));
    }

    let tenant_id = std::env::var("SIBYL_TENANT_ID").unwrap_or_else(|_| "default".to_string());
    let tenant = TenantId::new(tenant_id);

    let driver = Arc::new(GraphDriver::new(std::path::Path::new(&config.graph_base_dir)));
    let relationships = Arc::new(RelationshipManager::new(driver.clone(), tenant.clone()));
    let entities = Arc::new(EntityManager::new(driver.clone(), tenant.clone()).with_relationships(relationships));
    let pubsub = Arc::new(PubSub::new(config.bus_channel_capacity));
    let bus = Arc::new(MessageBus::new(driver.clone(), tenant.clone(), pubsub));

    let matchers: Vec<Box<dyn ToolCallMatcher>> = vec![
        Box::new(DestructiveCommandMatcher { shell_tool_name: "shell".to_string() }),
        Box::new(FileWriteMatcher { write_tool_names: vec!["write".to_string(), "edit".to_string(), "multi_edit".to_string()] }),
        Box::new(ExternalApiMatcher {
            fetch_tool_name: "web_fetch".to_string(),
            high_risk_domains: vec![
                Regex::new(r"(?i)pastebin\.com").expect("valid regex"),
                Regex::new(r"(?i)webhook\.site").expect("valid regex"),
                Regex::new(r"(?i)requestbin\.").expect("valid regex"),
            ],
        }),
        Box::new(UserQuestionMatcher { question_tool_name: "ask_user".to_string() }),
    ];
    let approvals = Arc::new(
        ApprovalService::new(tenant.clone(), entities.clone(), bus.clone(), matchers)
            .with_timeouts(
                std::time::Duration::from_secs(config.approval_wait_timeout_secs),
                std::time::Duration::from_secs(config.question_wait_timeout_secs),
            ),
    );
    let runner = Arc::new(AgentRunner::new(tenant.clone(), entities.clone(), bus.clone(), approvals, Arc::new(UnconfiguredAgentRuntime)));

    let queue = Arc::new(JobQueue::new(driver, tenant));
    let limits = QueueLimits {
        job_timeout: std::time::Duration::from_secs(config.job_default_timeout_secs),
        max_concurrent: config.job_worker_concurrency,
        ..QueueLimits::default()
    };
    let mut worker = Worker::new(vec![queue], limits);
    worker.register("run_agent_execution", Arc::new(RunAgentExecutionHandler { runner: runner.clone() }));
    worker.register("resume_agent_execution", Arc::new(ResumeAgentExecutionHandler { runner }));

    info!("sibyl worker starting poll loop");
    loop {
        let claimed = worker.poll_once().await;
        if claimed == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }
}
