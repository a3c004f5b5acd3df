/**
 * C7 — Agent Runner
 *
 * Spawns/resumes agents, pumps the external runtime's stream into C4/C2,
 * and drives C5 tool-call gating. The runtime itself is out of scope
 * (spec §1); this module owns only the stream contract (`types.rs`), the
 * formatting rules (`format.rs`), the workflow reminder heuristic
 * (`workflow.rs`), and the pump loop (`runner.rs`).
 */
mod format;
mod runner;
mod types;
mod workflow;

pub use format::{text_preview, tool_icon_and_preview};
pub use runner::AgentRunner;
pub use types::{AgentRuntime, NullStatusHinter, RuntimeBlock, RuntimeEvent, RuntimeMessage, RuntimeStream, StatusHinter, ToolResultBlock};
pub use workflow::WorkflowTracker;
