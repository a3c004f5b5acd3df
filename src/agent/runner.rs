/**
 * Agent Runner (C7)
 *
 * Spawns/resumes agents, pumps the runtime's message stream into C4
 * (durable append + publish) and C2 (checkpoint/status writes), and
 * drives C5 gating for tool calls the matchers care about.
 */
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::approval::{ApprovalService, GateDecision, ToolCall};
use crate::bus::{Event, MessageBus, MessageType, Role};
use crate::entity::{Entity, EntityKind, EntityManager, EntityUpdate, ListFilters};
use crate::error::Result;
use crate::tenant::TenantId;

use super::format::{text_preview, tool_icon_and_preview};
use super::types::{AgentRuntime, NullStatusHinter, RuntimeBlock, RuntimeMessage, RuntimeStream, StatusHinter, ToolResultBlock};
use super::workflow::WorkflowTracker;

pub struct AgentRunner {
    tenant: TenantId,
    entities: Arc<EntityManager>,
    bus: Arc<MessageBus>,
    approvals: Arc<ApprovalService>,
    runtime: Arc<dyn AgentRuntime>,
    hinter: Arc<dyn StatusHinter>,
}

impl AgentRunner {
    pub fn new(tenant: TenantId, entities: Arc<EntityManager>, bus: Arc<MessageBus>, approvals: Arc<ApprovalService>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self { tenant, entities, bus, approvals, runtime, hinter: Arc::new(NullStatusHinter) }
    }

    pub fn with_status_hinter(mut self, hinter: Arc<dyn StatusHinter>) -> Self {
        self.hinter = hinter;
        self
    }

    /// Creates the `agent` entity and begins streaming a fresh execution.
    pub async fn spawn(&self, agent_id: &str, prompt: &str, agent_type: &str, project_id: Option<&str>, task_id: Option<&str>) -> Result<()> {
        let mut agent = Entity::new(agent_id, self.tenant.as_str(), EntityKind::Agent, format!("agent {agent_id}"));
        agent.structured.insert("agent_type".into(), json!(agent_type));
        agent.structured.insert("status".into(), json!("initializing"));
        agent.structured.insert("started_at".into(), json!(Utc::now().to_rfc3339()));
        if let Some(p) = project_id {
            agent.structured.insert("project_id".into(), json!(p));
        }
        if let Some(t) = task_id {
            agent.structured.insert("task_id".into(), json!(t));
        }
        self.entities.create_direct(agent, false).await?;

        let stream = self.runtime.start(prompt).await?;
        self.pump(agent_id, stream, Some(prompt.to_string())).await
    }

    /// Re-attaches to the external runtime using the session identity
    /// stored on the agent entity and streams a continuation.
    pub async fn resume_agent(&self, agent_id: &str, prompt: &str) -> Result<()> {
        let agent = self.entities.get(agent_id).await?;
        let session_id = agent
            .structured
            .get("session_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| crate::error::Error::InvalidInput(format!("agent {agent_id} has no session_id to resume")))?
            .to_string();

        let stream = self.runtime.resume(&session_id, prompt).await?;
        self.pump(agent_id, stream, Some(prompt.to_string())).await
    }

    /// Alternate re-attach: reads the latest checkpoint entity for
    /// `agent_id` and reconstructs context from its stored conversation
    /// history instead of the live runtime session.
    pub async fn resume_from_checkpoint(&self, agent_id: &str) -> Result<()> {
        let checkpoint = self.latest_checkpoint(agent_id).await?;
        let session_id = checkpoint
            .structured
            .get("session_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| crate::error::Error::InvalidInput(format!("checkpoint for agent {agent_id} has no session_id")))?
            .to_string();
        let context = checkpoint
            .structured
            .get("conversation_history")
            .cloned()
            .unwrap_or(JsonValue::Null);

        let prompt = format!("Resuming from checkpoint: {context}");
        let stream = self.runtime.resume(&session_id, &prompt).await?;
        self.pump(agent_id, stream, None).await
    }

    async fn latest_checkpoint(&self, agent_id: &str) -> Result<Entity> {
        let mut checkpoints = self.entities.list_by_type(EntityKind::Checkpoint, 1000, 0, ListFilters::default()).await?;
        checkpoints.retain(|c| c.structured.get("agent_id").and_then(|v| v.as_str()) == Some(agent_id));
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        checkpoints
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::Error::NotFound(format!("no checkpoint for agent {agent_id}")))
    }

    /// The stream pump loop. `initial_prompt`, when given, is
    /// appended as the first message of this call before the loop starts
    /// (spawn and prompt-carrying resumes supply one; checkpoint resume
    /// does not, since the prompt there is synthetic context).
    async fn pump(&self, agent_id: &str, mut stream: Box<dyn RuntimeStream>, initial_prompt: Option<String>) -> Result<()> {
        if let Some(prompt) = initial_prompt {
            self.append_and_publish(agent_id, Role::User, MessageType::Text, prompt, None, None, BTreeMap::new()).await;
        }
        self.set_status(agent_id, "working").await;

        let mut tracker = WorkflowTracker::new();
        let result = self.drive(agent_id, stream.as_mut(), &mut tracker).await;

        match result {
            Ok(summary) => {
                self.write_checkpoint(agent_id, &summary).await?;
                self.set_status(agent_id, "completed").await;
                Ok(())
            }
            Err(e) => {
                self.append_and_publish(
                    agent_id,
                    Role::System,
                    MessageType::Text,
                    format!("Agent execution failed: {e}"),
                    None,
                    None,
                    BTreeMap::new(),
                )
                .await;
                self.set_status(agent_id, "failed").await;
                Err(e)
            }
        }
    }

    async fn drive(&self, agent_id: &str, stream: &mut dyn RuntimeStream, tracker: &mut WorkflowTracker) -> Result<JsonValue> {
        loop {
            let Some(event) = stream.next().await? else {
                return Err(crate::error::Error::Fatal(format!("agent {agent_id} stream ended without a terminal message")));
            };

            if let Some(session_id) = &event.session_id {
                self.maybe_update_session(agent_id, session_id).await;
            }

            match event.message {
                RuntimeMessage::Assistant(blocks) if blocks.len() == 1 => {
                    match &blocks[0] {
                        RuntimeBlock::Text(text) => {
                            let mut extra = BTreeMap::new();
                            extra.insert("preview".to_string(), json!(text_preview(text)));
                            self.append_and_publish(agent_id, Role::Agent, MessageType::Text, text.clone(), None, None, extra).await;
                        }
                        RuntimeBlock::ToolUse { tool_name, tool_id, input } => {
                            self.handle_tool_use(agent_id, tool_name, tool_id, input, tracker).await?;
                        }
                    }
                }
                RuntimeMessage::Assistant(blocks) => {
                    let mut rendered = Vec::with_capacity(blocks.len());
                    for block in &blocks {
                        match block {
                            RuntimeBlock::Text(text) => rendered.push(json!({"type": "text", "content": text})),
                            RuntimeBlock::ToolUse { tool_name, tool_id, input } => {
                                let (icon, preview) = tool_icon_and_preview(tool_name, input);
                                rendered.push(json!({"type": "tool_call", "tool_name": tool_name, "tool_id": tool_id, "icon": icon, "preview": preview}));
                                tracker.observe_tool_call(tool_name);
                            }
                        }
                    }
                    let preview = rendered.first().and_then(|b| b.get("preview").or(b.get("content"))).cloned().unwrap_or(json!(""));
                    let mut extra = BTreeMap::new();
                    extra.insert("blocks".to_string(), json!(rendered));
                    extra.insert("preview".to_string(), preview);
                    self.append_and_publish(agent_id, Role::Agent, MessageType::MultiBlock, String::new(), None, None, extra).await;
                    self.maybe_remind(agent_id, tracker).await;
                }
                RuntimeMessage::ToolResults(results) if results.len() == 1 => {
                    let r = &results[0];
                    let mut extra = BTreeMap::new();
                    extra.insert("is_error".to_string(), json!(r.is_error));
                    self.append_and_publish(agent_id, Role::System, MessageType::ToolResult, r.content.clone(), Some(r.tool_id.clone()), None, extra)
                        .await;
                }
                RuntimeMessage::ToolResults(results) => {
                    let rendered: Vec<JsonValue> = results
                        .iter()
                        .map(|r| json!({"tool_id": r.tool_id, "content": r.content, "is_error": r.is_error}))
                        .collect();
                    let mut extra = BTreeMap::new();
                    extra.insert("results".to_string(), json!(rendered));
                    self.append_and_publish(agent_id, Role::System, MessageType::MultiResult, String::new(), None, None, extra).await;
                }
                RuntimeMessage::Terminal { input_tokens, output_tokens, cost_usd, session_id } => {
                    let mut extra = BTreeMap::new();
                    extra.insert("usage".to_string(), json!({"input_tokens": input_tokens, "output_tokens": output_tokens}));
                    extra.insert("cost_usd".to_string(), json!(cost_usd));
                    if let Some(s) = &session_id {
                        extra.insert("session_id".to_string(), json!(s));
                    }
                    self.append_and_publish(agent_id, Role::System, MessageType::Result, String::new(), None, None, extra.clone()).await;
                    return Ok(json!({"usage": extra.get("usage"), "cost_usd": cost_usd}));
                }
            }
        }
    }

    async fn handle_tool_use(&self, agent_id: &str, tool_name: &str, tool_id: &str, input: &JsonValue, tracker: &mut WorkflowTracker) -> Result<()> {
        let (icon, preview) = tool_icon_and_preview(tool_name, input);
        let mut extra = BTreeMap::new();
        extra.insert("tool_name".to_string(), json!(tool_name));
        extra.insert("tool_id".to_string(), json!(tool_id));
        extra.insert("icon".to_string(), json!(icon));
        extra.insert("preview".to_string(), json!(preview));
        extra.insert("input".to_string(), input.clone());
        self.append_and_publish(agent_id, Role::Agent, MessageType::ToolCall, String::new(), Some(tool_id.to_string()), None, extra).await;

        tracker.observe_tool_call(tool_name);
        self.fire_status_hint(agent_id, tool_name, input);

        let decision = self
            .approvals
            .gate(ToolCall { agent_id: agent_id.to_string(), tool_name: tool_name.to_string(), input: input.clone() })
            .await?;

        match decision {
            GateDecision::Allowed => {}
            GateDecision::Denied { reason } => {
                let mut extra = BTreeMap::new();
                extra.insert("is_error".to_string(), json!(true));
                self.append_and_publish(agent_id, Role::System, MessageType::ToolResult, reason, Some(tool_id.to_string()), None, extra).await;
            }
            GateDecision::Intercepted { result } => {
                let mut extra = BTreeMap::new();
                extra.insert("is_error".to_string(), json!(false));
                self.append_and_publish(agent_id, Role::System, MessageType::ToolResult, result.to_string(), Some(tool_id.to_string()), None, extra).await;
            }
        }

        self.maybe_remind(agent_id, tracker).await;
        Ok(())
    }

    async fn maybe_remind(&self, agent_id: &str, tracker: &mut WorkflowTracker) {
        if tracker.should_remind() {
            self.append_and_publish(
                agent_id,
                Role::System,
                MessageType::Text,
                "Reminder: confirm tests pass and docs are updated before wrapping up.".to_string(),
                None,
                None,
                BTreeMap::new(),
            )
            .await;
        }
    }

    /// Fire-and-forget: failures are logged and never propagated (spec
    /// §4.7 status hints, §7 best-effort propagation policy).
    fn fire_status_hint(&self, agent_id: &str, tool_name: &str, input: &JsonValue) {
        let hinter = self.hinter.clone();
        let bus = self.bus.clone();
        let tenant = self.tenant.clone();
        let agent_id = agent_id.to_string();
        let tool_name = tool_name.to_string();
        let input = input.clone();
        tokio::spawn(async move {
            match hinter.hint(&tool_name, &input).await {
                Ok(hint) => bus.publish(&tenant, Event::StatusHint { agent_id, hint }),
                Err(e) => warn!(error = %e, agent_id, "status hint generation failed, ignoring"),
            }
        });
    }

    async fn maybe_update_session(&self, agent_id: &str, session_id: &str) {
        let current = self.entities.get(agent_id).await.ok().and_then(|a| a.structured.get("session_id").and_then(|v| v.as_str().map(String::from)));
        if current.as_deref() == Some(session_id) {
            return;
        }
        let mut structured = BTreeMap::new();
        structured.insert("session_id".to_string(), json!(session_id));
        if let Err(e) = self.entities.update(agent_id, EntityUpdate { structured: Some(structured), ..Default::default() }).await {
            warn!(error = %e, agent_id, "failed to persist session id change");
        }
    }

    async fn set_status(&self, agent_id: &str, status: &str) {
        let mut structured = BTreeMap::new();
        structured.insert("status".to_string(), json!(status));
        if let Err(e) = self.entities.update(agent_id, EntityUpdate { structured: Some(structured), ..Default::default() }).await {
            warn!(error = %e, agent_id, status, "failed to persist agent status");
        }
        self.bus.publish(&self.tenant, Event::AgentStatus { agent_id: agent_id.to_string(), status: status.to_string() });
    }

    async fn write_checkpoint(&self, agent_id: &str, summary: &JsonValue) -> Result<()> {
        let checkpoint_id = format!("checkpoint_{agent_id}_{}", Utc::now().timestamp_millis());
        let session_id = self.entities.get(agent_id).await.ok().and_then(|a| a.structured.get("session_id").and_then(|v| v.as_str().map(String::from)));

        let mut checkpoint = Entity::new(checkpoint_id, self.tenant.as_str(), EntityKind::Checkpoint, format!("checkpoint for {agent_id}"));
        checkpoint.structured.insert("agent_id".into(), json!(agent_id));
        if let Some(s) = session_id {
            checkpoint.structured.insert("session_id".into(), json!(s));
        }
        checkpoint.structured.insert("conversation_history".into(), summary.clone());
        checkpoint.structured.insert("current_step".into(), json!("completed"));
        self.entities.create_direct(checkpoint, false).await?;
        Ok(())
    }

    async fn append_and_publish(
        &self,
        agent_id: &str,
        role: Role,
        message_type: MessageType,
        content: String,
        tool_use_id: Option<String>,
        parent_tool_use_id: Option<String>,
        extra: BTreeMap<String, JsonValue>,
    ) {
        match self.bus.append(agent_id, role, message_type, content, tool_use_id, parent_tool_use_id, extra).await {
            Ok(message) => self.bus.publish(&self.tenant, Event::AgentMessage { agent_id: agent_id.to_string(), message: Box::new(message) }),
            Err(e) => warn!(error = %e, agent_id, "failed to append agent message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalService, DestructiveCommandMatcher};
    use crate::bus::{ApprovalResponse, PubSub};
    use crate::entity::EntityKind;
    use crate::graph::GraphDriver;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct ScriptedStream(VecDeque<RuntimeEvent>);

    #[async_trait]
    impl RuntimeStream for ScriptedStream {
        async fn next(&mut self) -> Result<Option<RuntimeEvent>> {
            Ok(self.0.pop_front())
        }
    }

    struct ScriptedRuntime {
        start_script: StdMutex<Option<VecDeque<RuntimeEvent>>>,
        resume_script: StdMutex<Option<VecDeque<RuntimeEvent>>>,
    }

    #[async_trait]
    impl AgentRuntime for ScriptedRuntime {
        async fn start(&self, _prompt: &str) -> Result<Box<dyn RuntimeStream>> {
            let script = self.start_script.lock().unwrap().take().expect("start script consumed twice");
            Ok(Box::new(ScriptedStream(script)))
        }

        async fn resume(&self, _session_id: &str, _prompt: &str) -> Result<Box<dyn RuntimeStream>> {
            let script = self.resume_script.lock().unwrap().take().expect("resume script consumed twice");
            Ok(Box::new(ScriptedStream(script)))
        }
    }

    fn terminal_event(session_id: Option<&str>) -> RuntimeEvent {
        RuntimeEvent {
            message: RuntimeMessage::Terminal { input_tokens: 100, output_tokens: 50, cost_usd: 0.01, session_id: session_id.map(String::from) },
            session_id: session_id.map(String::from),
        }
    }

    fn tool_use_event(tool_name: &str, tool_id: &str, input: JsonValue) -> RuntimeEvent {
        RuntimeEvent {
            message: RuntimeMessage::Assistant(vec![RuntimeBlock::ToolUse { tool_name: tool_name.to_string(), tool_id: tool_id.to_string(), input }]),
            session_id: Some("sess_abc".to_string()),
        }
    }

    async fn make_runner(dir: &std::path::Path, runtime: Arc<dyn AgentRuntime>) -> (AgentRunner, Arc<EntityManager>, Arc<MessageBus>) {
        let driver = Arc::new(GraphDriver::new(dir));
        let tenant = TenantId::new("acme");
        let entities = Arc::new(EntityManager::new(driver.clone(), tenant.clone()));
        let bus = Arc::new(MessageBus::new(driver, tenant.clone(), Arc::new(PubSub::new(32))));
        let matchers: Vec<Box<dyn crate::approval::ToolCallMatcher>> =
            vec![Box::new(DestructiveCommandMatcher { shell_tool_name: "shell".to_string() })];
        let approvals = Arc::new(ApprovalService::new(tenant.clone(), entities.clone(), bus.clone(), matchers));
        let runner = AgentRunner::new(tenant, entities.clone(), bus.clone(), approvals, runtime);
        (runner, entities, bus)
    }

    #[tokio::test]
    async fn test_spawn_runs_to_completion_without_gated_tools() {
        let dir = tempdir().unwrap();
        let script: VecDeque<RuntimeEvent> = VecDeque::from(vec![
            RuntimeEvent { message: RuntimeMessage::Assistant(vec![RuntimeBlock::Text("hi there".to_string())]), session_id: None },
            terminal_event(Some("sess_1")),
        ]);
        let runtime = Arc::new(ScriptedRuntime { start_script: StdMutex::new(Some(script)), resume_script: StdMutex::new(None) });
        let (runner, entities, bus) = make_runner(dir.path(), runtime).await;

        runner.spawn("agent_1", "do the thing", "general", None, None).await.unwrap();

        let agent = entities.get("agent_1").await.unwrap();
        assert_eq!(agent.structured.get("status").and_then(|v| v.as_str()), Some("completed"));
        assert_eq!(agent.structured.get("session_id").and_then(|v| v.as_str()), Some("sess_1"));

        let messages = bus.get_after("agent_1", 0, 100).await.unwrap();
        assert!(messages.iter().any(|m| m.message_type == MessageType::Result));
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_gated_tool_call_approved_completes_agent() {
        let dir = tempdir().unwrap();
        let script: VecDeque<RuntimeEvent> = VecDeque::from(vec![
            tool_use_event("shell", "tool_1", json!({"command": "rm -rf /var/log/old"})),
            terminal_event(Some("sess_2")),
        ]);
        let runtime = Arc::new(ScriptedRuntime { start_script: StdMutex::new(Some(script)), resume_script: StdMutex::new(None) });
        let (runner, entities, bus) = make_runner(dir.path(), runtime).await;

        let run = tokio::spawn({
            let bus = bus.clone();
            async move {
                let handle = tokio::spawn(async move { runner.spawn("agent_1", "delete old logs", "general", None, None).await });
                // Poll for the pending approval, then approve it.
                let approval_id = loop {
                    // Approval ids are unpredictable; scan agent messages for the marker.
                    if let Ok(msgs) = bus.get_after("agent_1", 0, 50).await {
                        if let Some(id) = msgs.iter().find_map(|m| m.extra.get("approval_id").and_then(|v| v.as_str().map(String::from))) {
                            break id;
                        }
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                };
                bus.respond_approval(&approval_id, ApprovalResponse { approved: true, by: "alice".into(), message: "go ahead".into() });
                handle.await.unwrap()
            }
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), run).await.unwrap().unwrap().unwrap();

        let agent = entities.get("agent_1").await.unwrap();
        assert_eq!(agent.structured.get("status").and_then(|v| v.as_str()), Some("completed"));

        let approvals = entities.list_by_type(EntityKind::Approval, 10, 0, Default::default()).await.unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].structured.get("status").and_then(|v| v.as_str()), Some("approved"));
        assert_eq!(approvals[0].structured.get("response_by").and_then(|v| v.as_str()), Some("alice"));
    }

    #[tokio::test]
    async fn test_resume_preserves_and_updates_session_id() {
        let dir = tempdir().unwrap();
        let start_script: VecDeque<RuntimeEvent> = VecDeque::from(vec![terminal_event(Some("sess_abc"))]);
        let resume_script: VecDeque<RuntimeEvent> = VecDeque::from(vec![terminal_event(Some("sess_forked"))]);
        let runtime = Arc::new(ScriptedRuntime { start_script: StdMutex::new(Some(start_script)), resume_script: StdMutex::new(Some(resume_script)) });
        let (runner, entities, _bus) = make_runner(dir.path(), runtime).await;

        runner.spawn("agent_1", "start", "general", None, None).await.unwrap();
        assert_eq!(entities.get("agent_1").await.unwrap().structured.get("session_id").and_then(|v| v.as_str()), Some("sess_abc"));

        runner.resume_agent("agent_1", "continue").await.unwrap();
        assert_eq!(entities.get("agent_1").await.unwrap().structured.get("session_id").and_then(|v| v.as_str()), Some("sess_forked"));
    }

    #[tokio::test]
    async fn test_stream_error_marks_agent_failed() {
        struct FailingStream;
        #[async_trait]
        impl RuntimeStream for FailingStream {
            async fn next(&mut self) -> Result<Option<RuntimeEvent>> {
                Err(crate::error::Error::Transient("runtime disconnected".to_string()))
            }
        }
        struct FailingRuntime;
        #[async_trait]
        impl AgentRuntime for FailingRuntime {
            async fn start(&self, _prompt: &str) -> Result<Box<dyn RuntimeStream>> {
                Ok(Box::new(FailingStream))
            }
            async fn resume(&self, _session_id: &str, _prompt: &str) -> Result<Box<dyn RuntimeStream>> {
                Ok(Box::new(FailingStream))
            }
        }

        let dir = tempdir().unwrap();
        let (runner, entities, _bus) = make_runner(dir.path(), Arc::new(FailingRuntime)).await;
        assert!(runner.spawn("agent_1", "do it", "general", None, None).await.is_err());
        assert_eq!(entities.get("agent_1").await.unwrap().structured.get("status").and_then(|v| v.as_str()), Some("failed"));
    }
}
