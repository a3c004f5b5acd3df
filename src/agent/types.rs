/**
 * Agent Runtime Stream Contract (C7)
 *
 * The LLM agent runtime itself is an external collaborator this crate does
 * not implement; this module defines only the shape of the stream we consume
 * from it and the trait seam a real integration would implement.
 */
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;

/// One block inside an assistant message. A single-text message and a
/// single-tool-use message both carry exactly one block; "multi_block"
/// messages carry more than one.
#[derive(Debug, Clone)]
pub enum RuntimeBlock {
    Text(String),
    ToolUse { tool_name: String, tool_id: String, input: JsonValue },
}

#[derive(Debug, Clone)]
pub struct ToolResultBlock {
    pub tool_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub enum RuntimeMessage {
    /// An assistant turn: one or more blocks. Formatting branches on
    /// whether there's exactly one block or several.
    Assistant(Vec<RuntimeBlock>),
    /// A user turn carrying tool results (one or more).
    ToolResults(Vec<ToolResultBlock>),
    /// The runtime's terminal "result" message.
    Terminal { input_tokens: u64, output_tokens: u64, cost_usd: f64, session_id: Option<String> },
}

/// One item off the runtime's stream, alongside the runtime's current
/// external session id (the runner watches this for drift so it can keep
/// the agent entity's `session_id` current).
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub message: RuntimeMessage,
    pub session_id: Option<String>,
}

/// A live stream from one agent execution. `next` returns `Ok(None)` when
/// the stream ends without a terminal message (treated as a runtime-side
/// disconnect, not a clean completion) and propagates `Err` for runtime
/// failures, since critical-path errors are not swallowed.
#[async_trait]
pub trait RuntimeStream: Send {
    async fn next(&mut self) -> Result<Option<RuntimeEvent>>;
}

/// Spawns and resumes agent executions against the external runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn start(&self, prompt: &str) -> Result<Box<dyn RuntimeStream>>;
    async fn resume(&self, session_id: &str, prompt: &str) -> Result<Box<dyn RuntimeStream>>;
}

/// Computes a short, playful "what we're doing now" string for a tool
/// call. A real implementation calls a small LLM; failures are logged and
/// ignored by the caller, never propagated.
#[async_trait]
pub trait StatusHinter: Send + Sync {
    async fn hint(&self, tool_name: &str, input: &JsonValue) -> Result<String>;
}

pub struct NullStatusHinter;

#[async_trait]
impl StatusHinter for NullStatusHinter {
    async fn hint(&self, _tool_name: &str, _input: &JsonValue) -> Result<String> {
        Err(crate::error::Error::Transient("no status hinter configured".to_string()))
    }
}
