/**
 * Pub/Sub Broadcast and Response Wait Primitives (C4)
 *
 * DESIGN DECISION: Two independent mechanisms share one `PubSub` struct:
 * tenant-wide broadcast topics (`agent_status`, `agent_message`, ...) and
 * per-id oneshot response channels (`approval:{id}`, `question:{id}`).
 * WHY: Broadcast topics are fan-out (many subscribers, replayable via a
 * bounded ring buffer) while a response channel is fan-in-one (exactly one
 * waiter, delivered exactly once) — `tokio::sync::broadcast` and
 * `tokio::sync::oneshot` are the right primitive for each, and conflating
 * them would force response delivery through a topic filter instead of a
 * direct handoff.
 *
 * REASONING CHAIN:
 * 1. `subscribe_response` must be callable, and its receiver usable,
 *    strictly before the corresponding request is persisted and
 *    published — the design notes require this to be a compile-time-
 *    obvious property of the API, not a convention. Returning an owned
 *    `ResponseWaiter` from `subscribe_response` (rather than requiring the
 *    caller to pass an id to a later `wait` call) makes the "subscribe
 *    first" step a value the caller must already be holding before they
 *    can do anything else with it.
 * 2. Best-effort broadcast publishes never fail the caller: a topic with
 *    no subscribers, or subscribers that lag past the channel capacity,
 *    both just drop messages silently (broadcast::Sender::send returning
 *    an error means "no receivers," which is not an error for a
 *    fire-and-forget publish).
 * 3. Response delivery is NOT best-effort: `respond` returns a bool so a
 *    caller (the approval HTTP handler) can tell whether a waiter was
 *    actually listening; the waiter's `wait` always terminates (delivery
 *    or timeout), never raises.
 */
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, oneshot};
use tracing::warn;

use crate::tenant::TenantId;

use super::types::{Envelope, Event};

/// A single-use handle to a pending response channel. Obtained from
/// `PubSub::subscribe_response` before the corresponding request is
/// persisted or published.
pub struct ResponseWaiter {
    rx: oneshot::Receiver<JsonValue>,
}

pub struct PubSub {
    capacity: usize,
    topics: Mutex<HashMap<TenantId, broadcast::Sender<Envelope>>>,
    responses: Mutex<HashMap<String, oneshot::Sender<JsonValue>>>,
}

impl PubSub {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), topics: Mutex::new(HashMap::new()), responses: Mutex::new(HashMap::new()) }
    }

    fn topic_sender(&self, tenant: &TenantId) -> broadcast::Sender<Envelope> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(tenant.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to this tenant's event topic. Call before any publish you
    /// need to observe; broadcast channels do not replay history to late
    /// subscribers.
    pub fn subscribe(&self, tenant: &TenantId) -> broadcast::Receiver<Envelope> {
        self.topic_sender(tenant).subscribe()
    }

    /// Best-effort publish: failure (no subscribers, or all subscribers
    /// lagged off the channel) is logged and swallowed, never propagated
    /// to the caller.
    pub fn publish(&self, tenant: &TenantId, event: Event) {
        let sender = self.topic_sender(tenant);
        let envelope = Envelope { event, ts: Utc::now() };
        if sender.send(envelope).is_err() {
            warn!(tenant = %tenant, "pub/sub publish had no subscribers");
        }
    }

    /// Registers a one-shot response slot for `id` (e.g. `approval:{id}`
    /// or `question:{id}`) and returns a waiter over it. MUST be called
    /// before the request this response answers is persisted or
    /// published, to avoid a lost-wakeup race.
    pub fn subscribe_response(&self, id: impl Into<String>) -> ResponseWaiter {
        let (tx, rx) = oneshot::channel();
        self.responses.lock().unwrap().insert(id.into(), tx);
        ResponseWaiter { rx }
    }

    /// Delivers a response to whoever is waiting on `id`. Returns `true`
    /// if a waiter was registered and received it, `false` if nobody was
    /// listening (already timed out, or never subscribed — a caller
    /// posting a response to an unknown or already-resolved id).
    pub fn respond(&self, id: &str, value: JsonValue) -> bool {
        match self.responses.lock().unwrap().remove(id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Blocks on `waiter` until a response arrives or `timeout` elapses.
    /// Never raises: a timeout or a dropped sender both surface as `None`.
    pub async fn wait(&self, waiter: ResponseWaiter, timeout: Duration) -> Option<JsonValue> {
        match tokio::time::timeout(timeout, waiter.rx).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Removes a pending response slot without delivering a value, e.g.
    /// when a caller gives up after a timeout and wants to free the slot
    /// early (it would otherwise be cleaned up lazily on next `respond`).
    pub fn abandon_response(&self, id: &str) {
        self.responses.lock().unwrap().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_with_no_subscribers_does_not_panic() {
        let bus = PubSub::new(16);
        let tenant = TenantId::new("acme");
        bus.publish(&tenant, Event::AgentStatus { agent_id: "a1".into(), status: "working".into() });
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = PubSub::new(16);
        let tenant = TenantId::new("acme");
        let mut rx = bus.subscribe(&tenant);
        bus.publish(&tenant, Event::AgentStatus { agent_id: "a1".into(), status: "working".into() });

        let envelope = rx.recv().await.unwrap();
        match envelope.event {
            Event::AgentStatus { agent_id, status } => {
                assert_eq!(agent_id, "a1");
                assert_eq!(status, "working");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subscribe_before_publish_avoids_lost_wakeup() {
        let bus = PubSub::new(16);
        let waiter = bus.subscribe_response("approval:ap_1");
        bus.respond("approval:ap_1", serde_json::json!({"approved": true}));

        let response = bus.wait(waiter, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response["approved"], true);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_response() {
        let bus = PubSub::new(16);
        let waiter = bus.subscribe_response("approval:ap_2");
        let response = bus.wait(waiter, Duration::from_millis(20)).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_respond_to_unknown_id_returns_false() {
        let bus = PubSub::new(16);
        assert!(!bus.respond("approval:nonexistent", serde_json::json!(null)));
    }
}
