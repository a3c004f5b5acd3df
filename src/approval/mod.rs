/**
 * C5 — Approval Service
 *
 * Tool-call gating: policy match -> request -> suspend -> resume/deny.
 * Built on top of C2 (approval entities are an audit record) and C4
 * (request/response events, per-id wait primitives).
 */
mod matchers;
mod service;
mod types;

pub use matchers::{DestructiveCommandMatcher, ExternalApiMatcher, FileWriteMatcher, ToolCallMatcher, UserQuestionMatcher};
pub use service::{ApprovalService, APPROVAL_ENTITY_TTL, APPROVAL_WAIT_TIMEOUT, QUESTION_WAIT_TIMEOUT};
pub use types::{ApprovalStatus, GateDecision, MatchOutcome, ToolCall};
