/**
 * Sibyl Core
 *
 * Multi-tenant knowledge graph and agent execution substrate: a
 * tenant-isolated entity/relationship graph (C1-C3), a durable message bus
 * with pub/sub (C4), human-in-the-loop approval gating for dangerous tool
 * calls (C5), a durable job queue (C6), an agent runner that pumps an
 * external runtime's stream into the bus while enforcing gating (C7), and
 * a crawler pipeline interface (C8).
 *
 * Every manager in this crate is bound to exactly one tenant at
 * construction — no query crosses tenants by accident (see `tenant.rs`).
 */
pub mod agent;
pub mod approval;
pub mod bus;
pub mod config;
pub mod crawler;
pub mod entity;
pub mod error;
pub mod graph;
pub mod queue;
pub mod relationship;
pub mod tenant;

pub use agent::{AgentRunner, AgentRuntime, NullStatusHinter, RuntimeBlock, RuntimeEvent, RuntimeMessage, RuntimeStream, StatusHinter, ToolResultBlock};
pub use approval::{ApprovalService, DestructiveCommandMatcher, ExternalApiMatcher, FileWriteMatcher, GateDecision, MatchOutcome, ToolCall, ToolCallMatcher, UserQuestionMatcher};
pub use bus::{ApprovalResponse, Envelope, Event, Message, MessageBus, MessageType, PubSub, QuestionResponse, Role};
pub use config::{ConfigLoader, ConfigValidator, SibylConfig, ValidationIssue, ValidationResult};
pub use crawler::{CrawlOutcome, CrawlStatus, CrawlerPipeline, DirectCrawlerPipeline, FetchedPage};
pub use entity::{Entity, EntityKind, EntityManager, EntityUpdate};
pub use error::{Error, Result};
pub use graph::GraphDriver;
pub use queue::{Job, JobHandler, JobKind, JobQueue, JobStatus, QueueLimits, Worker};
pub use relationship::{Direction, Relationship, RelationshipKind, RelationshipManager};
pub use tenant::TenantId;

pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Returns the library version as a semantic version string.
pub fn version() -> String {
    format!("{}.{}.{}", VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        let ver = version();
        assert_eq!(ver, "0.1.0");
        assert!(ver.contains('.'));
    }
}
