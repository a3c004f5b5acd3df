/**
 * Message Bus Types (C4)
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Agent,
    System,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::System => "system",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    ToolCall,
    ToolResult,
    MultiBlock,
    MultiResult,
    Result,
}

/// One durable row in an agent's append-only message log. Identified by
/// `(agent_id, message_num)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub agent_id: String,
    pub tenant_id: String,
    /// Assigned by the bus under a tenant-serialized read-modify-write;
    /// starts at 1 and is contiguous per agent.
    pub message_num: u64,
    pub role: Role,
    pub message_type: MessageType,
    /// Full content, never truncated.
    pub content: String,
    /// Correlates a tool_call with its tool_result, and groups subagent
    /// tool calls under a parent.
    pub tool_use_id: Option<String>,
    pub parent_tool_use_id: Option<String>,
    /// Auxiliary rendering fields: icon, tool name, is_error, full
    /// tool-call input, full tool-result body.
    pub extra: BTreeMap<String, JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// Named pub/sub events broadcast on a tenant's topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    AgentStatus { agent_id: String, status: String },
    AgentMessage { agent_id: String, message: Box<Message> },
    StatusHint { agent_id: String, hint: String },
    ApprovalRequest { approval_id: String, agent_id: String },
    ApprovalResponse { approval_id: String, approved: bool },
    QuestionResponse { question_id: String, answers: JsonValue },
    CrawlStarted { source_id: String },
    CrawlProgress { source_id: String, documents: u64, chunks: u64 },
    CrawlComplete { source_id: String, status: String },
    EntityCreated { entity_id: String, kind: String },
    EntityUpdated { entity_id: String },
}

/// Envelope every subscriber actually receives: `{event, data, ts}` per
/// the pub/sub topic layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: Event,
    pub ts: DateTime<Utc>,
}

/// A human or system decision delivered on a per-approval response
/// channel (`approval:{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub by: String,
    pub message: String,
}

/// Answers delivered on a per-question response channel
/// (`question:{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub answers: BTreeMap<String, JsonValue>,
}
