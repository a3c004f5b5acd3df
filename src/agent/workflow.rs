/**
 * Workflow Reminder Tracker (C7)
 *
 * DESIGN DECISION: Plain counter struct rather than re-deriving the count
 * from the message log on every tool call.
 * WHY: The pump loop already sees every tool-use as it streams; tracking
 * state locally avoids a read per tool call just to decide whether to
 * remind.
 *
 * Kept as a candidate for removal once telemetry confirms whether it's
 * load-bearing — no telemetry component exists in this crate yet, so it
 * stays on.
 */
use super::format::is_code_change_tool;

#[derive(Debug, Default)]
pub struct WorkflowTracker {
    tool_call_count: usize,
    code_change_count: usize,
    reminded: bool,
}

impl WorkflowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_tool_call(&mut self, tool_name: &str) {
        self.tool_call_count += 1;
        if is_code_change_tool(tool_name) {
            self.code_change_count += 1;
        }
    }

    /// Fires exactly once: after at least 5 substantive tool calls,
    /// including at least one code change.
    pub fn should_remind(&mut self) -> bool {
        if !self.reminded && self.tool_call_count >= 5 && self.code_change_count >= 1 {
            self.reminded = true;
            return true;
        }
        false
    }
}
