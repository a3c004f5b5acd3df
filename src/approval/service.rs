/**
 * Approval Service (C5)
 *
 * DESIGN DECISION: The ordering the design notes require — persist,
 * subscribe, publish, wait — is encoded as the literal statement order of
 * `request_gate`, not left as a convention callers must remember.
 * WHY: §4.5's required ordering exists to close a lost-wakeup race: a
 * response that arrives between "persist" and "subscribe" would otherwise
 * vanish. Subscribing before publishing makes that race structurally
 * impossible rather than merely unlikely.
 */
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::bus::{ApprovalResponse as BusApprovalResponse, Event, MessageBus, MessageType, QuestionResponse, Role};
use crate::entity::{Entity, EntityKind, EntityManager, EntityUpdate};
use crate::error::Result;
use crate::tenant::TenantId;

use super::matchers::ToolCallMatcher;
use super::types::{ApprovalStatus, GateDecision, ToolCall};

/// Default deadlines per spec §5: approvals wait 5 minutes for a gate
/// decision even though the approval entity itself lives for 24 hours;
/// questions wait their own full 30-minute window.
pub const APPROVAL_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const APPROVAL_ENTITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const QUESTION_WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// `approval_<12 hex digits>` derived from `(agent_id, tool_name, now)`.
/// Not a cryptographic commitment — just a short, stable-looking id.
fn derive_approval_id(agent_id: &str, tool_name: &str, now: &chrono::DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(tool_name.as_bytes());
    hasher.update(now.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    format!("approval_{}", hex::encode(&digest[..6]))
}

pub struct ApprovalService {
    tenant: TenantId,
    entities: Arc<EntityManager>,
    bus: Arc<MessageBus>,
    matchers: Vec<Box<dyn ToolCallMatcher>>,
    approval_wait_timeout: Duration,
    question_wait_timeout: Duration,
}

impl ApprovalService {
    pub fn new(tenant: TenantId, entities: Arc<EntityManager>, bus: Arc<MessageBus>, matchers: Vec<Box<dyn ToolCallMatcher>>) -> Self {
        Self {
            tenant,
            entities,
            bus,
            matchers,
            approval_wait_timeout: APPROVAL_WAIT_TIMEOUT,
            question_wait_timeout: QUESTION_WAIT_TIMEOUT,
        }
    }

    /// Overrides the default wait deadlines. Used by tests and by callers
    /// that need a tighter SLA than the spec default.
    pub fn with_timeouts(mut self, approval_wait: Duration, question_wait: Duration) -> Self {
        self.approval_wait_timeout = approval_wait;
        self.question_wait_timeout = question_wait;
        self
    }

    /// Runs every registered matcher against `call`. Returns `None` if no
    /// matcher has an opinion — the tool proceeds ungated.
    fn first_match(&self, call: &ToolCall) -> Option<(&dyn ToolCallMatcher, super::types::MatchOutcome)> {
        for matcher in &self.matchers {
            if !matcher.applies_to(&call.tool_name) {
                continue;
            }
            if let Some(outcome) = matcher.evaluate(call) {
                return Some((matcher.as_ref(), outcome));
            }
        }
        None
    }

    /// Gates a single tool call. Returns `GateDecision::Allowed` with no
    /// side effects if nothing matches.
    pub async fn gate(&self, call: ToolCall) -> Result<GateDecision> {
        let Some((_, outcome)) = self.first_match(&call) else {
            return Ok(GateDecision::Allowed);
        };

        if outcome.intercept {
            return self.run_question(call, outcome).await;
        }
        self.run_approval(call, outcome).await
    }

    async fn run_approval(&self, call: ToolCall, outcome: super::types::MatchOutcome) -> Result<GateDecision> {
        let now = Utc::now();
        let approval_id = derive_approval_id(&call.agent_id, &call.tool_name, &now);
        let expires_at = now + chrono::Duration::from_std(APPROVAL_ENTITY_TTL).unwrap();

        // 1. persist
        let mut entity = Entity::new(approval_id.clone(), self.entities_tenant(), EntityKind::Approval, outcome.title.clone());
        entity.description = Some(outcome.summary.clone());
        entity.structured.insert("agent_id".into(), json!(call.agent_id));
        entity.structured.insert("approval_type".into(), json!(call.tool_name));
        entity.structured.insert("status".into(), json!(ApprovalStatus::Pending.as_str()));
        entity.structured.insert("title".into(), json!(outcome.title));
        entity.structured.insert("summary".into(), json!(outcome.summary));
        entity.metadata.insert("sensitive".into(), json!(outcome.sensitive));
        entity.metadata.insert("matcher".into(), outcome.matcher_metadata.clone());
        entity.metadata.insert("expires_at".into(), json!(expires_at.to_rfc3339()));
        self.entities.create_direct(entity, false).await?;

        // 2. subscribe (before publish — closes the lost-wakeup race)
        let waiter = self.bus.subscribe_approval_response(&approval_id);

        self.update_agent_status(&call.agent_id, "waiting_approval").await;
        self.append_pending_message(&call.agent_id, &approval_id, &outcome).await;

        // 3. publish
        self.bus.publish(
            &self.tenant_id_for_event(),
            Event::ApprovalRequest { approval_id: approval_id.clone(), agent_id: call.agent_id.clone() },
        );

        // 4. wait
        match self.bus.wait_for_approval_response(waiter, self.approval_wait_timeout).await {
            Some(response) => self.resolve_approval(&approval_id, response).await,
            None => self.expire_approval(&approval_id, "Approval request timed out").await,
        }
    }

    async fn run_question(&self, call: ToolCall, outcome: super::types::MatchOutcome) -> Result<GateDecision> {
        let now = Utc::now();
        let question_id = derive_approval_id(&call.agent_id, &call.tool_name, &now);

        let mut entity = Entity::new(question_id.clone(), self.entities_tenant(), EntityKind::Approval, outcome.title.clone());
        entity.description = Some(outcome.summary.clone());
        entity.structured.insert("agent_id".into(), json!(call.agent_id));
        entity.structured.insert("approval_type".into(), json!("question"));
        entity.structured.insert("status".into(), json!(ApprovalStatus::Pending.as_str()));
        entity.metadata.insert("matcher".into(), outcome.matcher_metadata.clone());
        self.entities.create_direct(entity, false).await?;

        let waiter = self.bus.subscribe_question_response(&question_id);
        self.update_agent_status(&call.agent_id, "waiting_input").await;
        self.append_pending_message(&call.agent_id, &question_id, &outcome).await;

        self.bus.publish(
            &self.tenant_id_for_event(),
            Event::ApprovalRequest { approval_id: question_id.clone(), agent_id: call.agent_id.clone() },
        );

        match self.bus.wait_for_question_response(waiter, self.question_wait_timeout).await {
            Some(QuestionResponse { answers }) => {
                let _ = self
                    .entities
                    .update(&question_id, EntityUpdate { structured: Some([("status".to_string(), json!("approved"))].into_iter().collect()), ..Default::default() })
                    .await;
                Ok(GateDecision::Intercepted { result: json!(answers) })
            }
            None => {
                let _ = self
                    .entities
                    .update(&question_id, EntityUpdate { structured: Some([("status".to_string(), json!("expired"))].into_iter().collect()), ..Default::default() })
                    .await;
                Ok(GateDecision::Denied { reason: "Question request timed out".to_string() })
            }
        }
    }

    /// Reads the approval entity's current `status` property back into an
    /// `ApprovalStatus`, or `None` if the entity is missing or carries no
    /// recognized status yet.
    async fn current_status(&self, approval_id: &str) -> Option<ApprovalStatus> {
        let entity = self.entities.get(approval_id).await.ok().flatten()?;
        entity.structured.get("status").and_then(|v| v.as_str()).and_then(ApprovalStatus::parse)
    }

    async fn resolve_approval(&self, approval_id: &str, response: BusApprovalResponse) -> Result<GateDecision> {
        let status = if response.approved { ApprovalStatus::Approved } else { ApprovalStatus::Denied };

        match self.current_status(approval_id).await {
            Some(current) if !current.can_transition_to(status) => {
                warn!(approval_id, ?current, ?status, "ignoring approval response, transition not legal from current status");
            }
            _ => {
                let mut structured = std::collections::BTreeMap::new();
                structured.insert("status".to_string(), json!(status.as_str()));
                structured.insert("response_by".to_string(), json!(response.by));
                structured.insert("responded_at".to_string(), json!(Utc::now().to_rfc3339()));
                structured.insert("response_message".to_string(), json!(response.message));
                if let Err(e) = self.entities.update(approval_id, EntityUpdate { structured: Some(structured), ..Default::default() }).await {
                    warn!(error = %e, approval_id, "failed to persist approval resolution");
                }
            }
        }

        if response.approved {
            Ok(GateDecision::Allowed)
        } else {
            Ok(GateDecision::Denied { reason: response.message })
        }
    }

    async fn expire_approval(&self, approval_id: &str, reason: &str) -> Result<GateDecision> {
        match self.current_status(approval_id).await {
            Some(current) if !current.can_transition_to(ApprovalStatus::Expired) => {
                warn!(approval_id, ?current, "ignoring expiry, transition to expired not legal from current status");
            }
            _ => {
                let mut structured = std::collections::BTreeMap::new();
                structured.insert("status".to_string(), json!(ApprovalStatus::Expired.as_str()));
                structured.insert("responded_at".to_string(), json!(Utc::now().to_rfc3339()));
                structured.insert("response_message".to_string(), json!(reason));
                if let Err(e) = self.entities.update(approval_id, EntityUpdate { structured: Some(structured), ..Default::default() }).await {
                    warn!(error = %e, approval_id, "failed to persist approval expiry");
                }
            }
        }
        self.bus.abandon_approval_response(approval_id);
        Ok(GateDecision::Denied { reason: reason.to_string() })
    }

    /// Cancellation sweep: for every pending approval belonging to
    /// `agent_id`, set it to `cancelled` and publish a denial so a
    /// suspended waiter wakes immediately instead of timing out.
    pub async fn cancel_pending_for_agent(&self, agent_id: &str) -> Result<usize> {
        let pending = self.entities.list_by_type(EntityKind::Approval, 1000, 0, crate::entity::ListFilters::default()).await?;
        let mut cancelled = 0usize;
        for approval in pending {
            let belongs = approval.structured.get("agent_id").and_then(|v| v.as_str()) == Some(agent_id);
            let current = approval.structured.get("status").and_then(|v| v.as_str()).and_then(ApprovalStatus::parse);
            let transitionable = current.is_some_and(|c| c.can_transition_to(ApprovalStatus::Cancelled));
            if !belongs || !transitionable {
                continue;
            }
            let mut structured = std::collections::BTreeMap::new();
            structured.insert("status".to_string(), json!(ApprovalStatus::Cancelled.as_str()));
            structured.insert("responded_at".to_string(), json!(Utc::now().to_rfc3339()));
            self.entities.update(&approval.id, EntityUpdate { structured: Some(structured), ..Default::default() }).await?;
            self.bus.respond_approval(&approval.id, BusApprovalResponse { approved: false, by: "system".into(), message: "agent cancelled".into() });
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn update_agent_status(&self, agent_id: &str, status: &str) {
        let mut structured = std::collections::BTreeMap::new();
        structured.insert("status".to_string(), json!(status));
        if let Err(e) = self.entities.update(agent_id, EntityUpdate { structured: Some(structured), ..Default::default() }).await {
            warn!(error = %e, agent_id, "failed to update agent status while gating");
        }
        self.bus.publish(&self.tenant_id_for_event(), Event::AgentStatus { agent_id: agent_id.to_string(), status: status.to_string() });
    }

    async fn append_pending_message(&self, agent_id: &str, approval_id: &str, outcome: &super::types::MatchOutcome) {
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("approval_id".to_string(), json!(approval_id));
        extra.insert("sensitive".to_string(), json!(outcome.sensitive));
        if let Ok(message) = self
            .bus
            .append(agent_id, Role::System, MessageType::Text, format!("Waiting for approval: {}", outcome.title), None, None, extra)
            .await
        {
            self.bus.publish(&self.tenant_id_for_event(), Event::AgentMessage { agent_id: agent_id.to_string(), message: Box::new(message) });
        }
    }

    fn entities_tenant(&self) -> &str {
        self.tenant.as_str()
    }

    fn tenant_id_for_event(&self) -> TenantId {
        self.tenant.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::PubSub;
    use crate::graph::GraphDriver;
    use tempfile::tempdir;

    async fn setup(dir: &std::path::Path) -> (ApprovalService, Arc<MessageBus>) {
        let driver = Arc::new(GraphDriver::new(dir));
        let tenant = TenantId::new("acme");
        let pubsub = Arc::new(PubSub::new(16));
        let bus = Arc::new(MessageBus::new(driver.clone(), tenant.clone(), pubsub));
        let entities = Arc::new(EntityManager::new(driver, tenant.clone()));

        let agent = Entity::new("agent_1", "acme", EntityKind::Agent, "runner");
        entities.create_direct(agent, false).await.unwrap();

        let matchers: Vec<Box<dyn ToolCallMatcher>> = vec![Box::new(DestructiveCommandMatcher {
            shell_tool_name: "shell".to_string(),
        })];
        let service = ApprovalService::new(tenant, entities, bus.clone(), matchers)
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(100));
        (service, bus)
    }

    #[tokio::test]
    async fn test_approve_path_allows_tool_and_marks_approved() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(GraphDriver::new(dir.path()));
        let tenant = TenantId::new("acme");
        let pubsub = Arc::new(PubSub::new(16));
        let bus = Arc::new(MessageBus::new(driver.clone(), tenant.clone(), pubsub));
        let entities = Arc::new(EntityManager::new(driver, tenant.clone()));
        entities.create_direct(Entity::new("agent_1", "acme", EntityKind::Agent, "runner"), false).await.unwrap();

        let matchers: Vec<Box<dyn ToolCallMatcher>> =
            vec![Box::new(DestructiveCommandMatcher { shell_tool_name: "shell".to_string() })];
        let service = Arc::new(ApprovalService::new(tenant, entities.clone(), bus.clone(), matchers));

        let call = ToolCall { agent_id: "agent_1".into(), tool_name: "shell".into(), input: json!({"command": "rm -rf /var/log/old"}) };
        let service2 = service.clone();
        let gate = tokio::spawn(async move { service2.gate(call).await });

        // Poll until the pending approval entity shows up.
        let approval_id = loop {
            let pending = entities.list_by_type(EntityKind::Approval, 10, 0, Default::default()).await.unwrap();
            if let Some(a) = pending.first() {
                break a.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        assert!(bus.respond_approval(&approval_id, BusApprovalResponse { approved: true, by: "alice".into(), message: "go ahead".into() }));

        let decision = tokio::time::timeout(Duration::from_secs(2), gate).await.unwrap().unwrap().unwrap();
        assert!(matches!(decision, GateDecision::Allowed));

        let approval = entities.get(&approval_id).await.unwrap();
        assert_eq!(approval.structured.get("status").and_then(|v| v.as_str()), Some("approved"));
        assert_eq!(approval.structured.get("response_by").and_then(|v| v.as_str()), Some("alice"));
    }

    #[tokio::test]
    async fn test_ungated_tool_call_is_allowed_immediately() {
        let dir = tempdir().unwrap();
        let (service, _bus) = setup(dir.path()).await;
        let call = ToolCall { agent_id: "agent_1".into(), tool_name: "shell".into(), input: json!({"command": "ls -la"}) };
        let decision = service.gate(call).await.unwrap();
        assert!(matches!(decision, GateDecision::Allowed));
    }

    #[tokio::test]
    async fn test_approval_times_out_and_denies() {
        let dir = tempdir().unwrap();
        let (service, _bus) = setup(dir.path()).await;
        let call = ToolCall { agent_id: "agent_1".into(), tool_name: "shell".into(), input: json!({"command": "git push --force origin main"}) };

        let decision = tokio::time::timeout(Duration::from_secs(2), service.gate(call)).await.unwrap().unwrap();
        match decision {
            GateDecision::Denied { reason } => assert_eq!(reason, "Approval request timed out"),
            other => panic!("expected timeout denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_pending_for_agent_releases_waiter() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(GraphDriver::new(dir.path()));
        let tenant = TenantId::new("acme");
        let bus = Arc::new(MessageBus::new(driver.clone(), tenant.clone(), Arc::new(PubSub::new(16))));
        let entities = Arc::new(EntityManager::new(driver, tenant.clone()));
        entities.create_direct(Entity::new("agent_1", "acme", EntityKind::Agent, "runner"), false).await.unwrap();

        let matchers: Vec<Box<dyn ToolCallMatcher>> =
            vec![Box::new(DestructiveCommandMatcher { shell_tool_name: "shell".to_string() })];
        let service = Arc::new(ApprovalService::new(tenant, entities.clone(), bus, matchers));

        let call = ToolCall { agent_id: "agent_1".into(), tool_name: "shell".into(), input: json!({"command": "rm -rf /data"}) };
        let service2 = service.clone();
        let gate = tokio::spawn(async move { service2.gate(call).await });

        // Poll until the pending approval is durably persisted before
        // sweeping, so the cancel isn't racing the initial persist.
        loop {
            let pending = entities.list_by_type(EntityKind::Approval, 10, 0, Default::default()).await.unwrap();
            if !pending.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let cancelled = service.cancel_pending_for_agent("agent_1").await.unwrap();
        assert_eq!(cancelled, 1);

        let decision = tokio::time::timeout(Duration::from_secs(2), gate).await.unwrap().unwrap();
        match decision.unwrap() {
            GateDecision::Denied { reason } => assert_eq!(reason, "agent cancelled"),
            other => panic!("expected denial, got {other:?}"),
        }
    }
}
