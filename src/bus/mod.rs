/**
 * C4 — Message Bus
 *
 * Two concerns behind one façade: durable per-agent message append
 * (`store`) and tenant-wide pub/sub broadcast plus per-id response waits
 * (`pubsub`). C5/C7 depend on `MessageBus`, never on `MessageStore` or
 * `PubSub` directly, so the subscribe-before-publish ordering the design
 * notes require lives in one place.
 */
mod pubsub;
mod store;
mod types;

pub use pubsub::{PubSub, ResponseWaiter};
pub use store::MessageStore;
pub use types::{ApprovalResponse, Envelope, Event, Message, MessageType, QuestionResponse, Role};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::graph::GraphDriver;
use crate::tenant::TenantId;

pub struct MessageBus {
    store: MessageStore,
    pubsub: Arc<PubSub>,
}

impl MessageBus {
    pub fn new(driver: Arc<GraphDriver>, tenant: TenantId, pubsub: Arc<PubSub>) -> Self {
        Self { store: MessageStore::new(driver, tenant), pubsub }
    }

    pub async fn append(
        &self,
        agent_id: &str,
        role: Role,
        message_type: MessageType,
        content: String,
        tool_use_id: Option<String>,
        parent_tool_use_id: Option<String>,
        extra: BTreeMap<String, JsonValue>,
    ) -> Result<Message> {
        self.store.append(agent_id, role, message_type, content, tool_use_id, parent_tool_use_id, extra).await
    }

    pub async fn get_after(&self, agent_id: &str, after: u64, limit: usize) -> Result<Vec<Message>> {
        self.store.get_after(agent_id, after, limit).await
    }

    pub fn subscribe(&self, tenant: &TenantId) -> tokio::sync::broadcast::Receiver<Envelope> {
        self.pubsub.subscribe(tenant)
    }

    /// Best-effort: a publish failure is logged by `PubSub` and never
    /// propagated here.
    pub fn publish(&self, tenant: &TenantId, event: Event) {
        self.pubsub.publish(tenant, event);
    }

    /// Subscribes to the `approval:{id}` response channel. Call this
    /// before persisting the approval entity: the ordering is persist,
    /// subscribe, publish, wait — this call IS the subscribe step, and must
    /// happen before the publish step.
    pub fn subscribe_approval_response(&self, approval_id: &str) -> ResponseWaiter {
        self.pubsub.subscribe_response(format!("approval:{approval_id}"))
    }

    pub fn subscribe_question_response(&self, question_id: &str) -> ResponseWaiter {
        self.pubsub.subscribe_response(format!("question:{question_id}"))
    }

    /// Delivers a decision to a waiting `wait_for_approval_response`
    /// caller. Returns `false` if nobody was (still) waiting.
    pub fn respond_approval(&self, approval_id: &str, response: ApprovalResponse) -> bool {
        let value = serde_json::to_value(response).unwrap_or(JsonValue::Null);
        self.pubsub.respond(&format!("approval:{approval_id}"), value)
    }

    pub fn respond_question(&self, question_id: &str, response: QuestionResponse) -> bool {
        let value = serde_json::to_value(response).unwrap_or(JsonValue::Null);
        self.pubsub.respond(&format!("question:{question_id}"), value)
    }

    /// Blocks on a previously-obtained approval waiter until a response
    /// arrives or `timeout` elapses. Never raises: timeouts synthesize a
    /// denial/expired state rather than raising, so the caller is
    /// responsible for treating `None` as a timeout.
    pub async fn wait_for_approval_response(&self, waiter: ResponseWaiter, timeout: Duration) -> Option<ApprovalResponse> {
        let value = self.pubsub.wait(waiter, timeout).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn wait_for_question_response(&self, waiter: ResponseWaiter, timeout: Duration) -> Option<QuestionResponse> {
        let value = self.pubsub.wait(waiter, timeout).await?;
        serde_json::from_value(value).ok()
    }

    pub fn abandon_approval_response(&self, approval_id: &str) {
        self.pubsub.abandon_response(&format!("approval:{approval_id}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bus(dir: &std::path::Path, tenant: &str) -> (MessageBus, TenantId) {
        let driver = Arc::new(GraphDriver::new(dir));
        let t = TenantId::new(tenant);
        (MessageBus::new(driver, t.clone(), Arc::new(PubSub::new(16))), t)
    }

    #[tokio::test]
    async fn test_append_and_read_back_via_bus() {
        let dir = tempdir().unwrap();
        let (bus, _) = bus(dir.path(), "acme");
        bus.append("agent_1", Role::User, MessageType::Text, "hi".into(), None, None, Default::default()).await.unwrap();
        let msgs = bus.get_after("agent_1", 0, 10).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "hi");
    }

    #[tokio::test]
    async fn test_approval_response_round_trip() {
        let dir = tempdir().unwrap();
        let (bus, _) = bus(dir.path(), "acme");
        let waiter = bus.subscribe_approval_response("ap_1");
        assert!(bus.respond_approval("ap_1", ApprovalResponse { approved: true, by: "alice".into(), message: "ok".into() }));

        let response = bus.wait_for_approval_response(waiter, Duration::from_secs(1)).await.unwrap();
        assert!(response.approved);
        assert_eq!(response.by, "alice");
    }

    #[tokio::test]
    async fn test_unanswered_approval_times_out() {
        let dir = tempdir().unwrap();
        let (bus, _) = bus(dir.path(), "acme");
        let waiter = bus.subscribe_approval_response("ap_2");
        let response = bus.wait_for_approval_response(waiter, Duration::from_millis(20)).await;
        assert!(response.is_none());
    }
}
