/**
 * Approval Service Types (C5)
 */
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Cancelled => "cancelled",
        }
    }

    /// The only legal transitions are `pending -> {approved, denied,
    /// expired, cancelled}`; nothing transitions back to pending, and
    /// terminal statuses are final (data model invariant).
    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        matches!(
            (self, next),
            (
                ApprovalStatus::Pending,
                ApprovalStatus::Approved | ApprovalStatus::Denied | ApprovalStatus::Expired | ApprovalStatus::Cancelled
            )
        )
    }

    /// Parses the stored `status` property back into a status, or `None` for
    /// an entity that predates this field or carries an unrecognized value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "denied" => Some(ApprovalStatus::Denied),
            "expired" => Some(ApprovalStatus::Expired),
            "cancelled" => Some(ApprovalStatus::Cancelled),
            _ => None,
        }
    }
}

/// A pending or resolved tool call a matcher decided to gate.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub agent_id: String,
    pub tool_name: String,
    pub input: JsonValue,
}

/// What a matcher decided about a tool call that it applies to.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub title: String,
    pub summary: String,
    pub sensitive: bool,
    /// Matcher-specific context (tool name, matched pattern, content
    /// preview) mirrored into the approval entity's metadata.
    pub matcher_metadata: JsonValue,
    /// When true, the tool itself is never invoked — the matcher's result
    /// (e.g. user-supplied answers) becomes the tool's return value
    /// instead (the user-question matcher).
    pub intercept: bool,
}

/// Outcome of waiting on a gated tool call.
#[derive(Debug, Clone)]
pub enum GateDecision {
    Allowed,
    Denied { reason: String },
    /// Intercepted: the tool never ran; this is the value returned to the
    /// agent in its place.
    Intercepted { result: JsonValue },
}
