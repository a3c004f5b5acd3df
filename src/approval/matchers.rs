/**
 * Policy Matchers (C5)
 *
 * DESIGN DECISION: A small trait with one `evaluate` method per matcher
 * variant, instead of a dynamic hook-callback system with runtime
 * introspection.
 * WHY: The source system's hook callbacks inspect arguments at runtime by
 * name; Rust's type system makes that brittle. A tagged set of matcher
 * structs, each owning its own pattern set, is a for-each over registered
 * matchers at the gating call site — exactly the re-architecture the
 * design notes call for (§9).
 */
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use super::types::{MatchOutcome, ToolCall};

pub trait ToolCallMatcher: Send + Sync {
    /// Whether this matcher has any opinion about `tool_name` at all.
    fn applies_to(&self, tool_name: &str) -> bool;

    /// Evaluates a tool call this matcher applies to. `None` means "does
    /// not gate this particular call" (only the file-write matcher ever
    /// returns `None` here for the tools it's otherwise interested in is
    /// not expected per spec — all its applicable calls gate unconditionally
    /// — but the signature stays uniform across matchers).
    fn evaluate(&self, call: &ToolCall) -> Option<MatchOutcome>;
}

fn destructive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\brm\s+(-[rf]+\s+)*[^\s]+",
            r"\bgit\s+push\s+.*--force",
            r"\bgit\s+reset\s+--hard",
            r"\bdrop\s+(table|database)\b",
            r"\btruncate\s+table\b",
            r"\bdocker\s+(system\s+prune|rm\s+-f)",
            r"\bkubectl\s+delete\b",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
    })
}

/// Gates a shell-exec tool whose command string matches a fixed list of
/// destructive-operation patterns (file removal, forced history rewrite,
/// database drop/truncate, orchestrator deletions, container cleanup).
pub struct DestructiveCommandMatcher {
    pub shell_tool_name: String,
}

impl ToolCallMatcher for DestructiveCommandMatcher {
    fn applies_to(&self, tool_name: &str) -> bool {
        tool_name == self.shell_tool_name
    }

    fn evaluate(&self, call: &ToolCall) -> Option<MatchOutcome> {
        let command = call.input.get("command").and_then(|v| v.as_str())?;
        let matched = destructive_patterns().iter().find(|re| re.is_match(command))?;

        Some(MatchOutcome {
            title: format!("Destructive command: {command}"),
            summary: format!("Matched destructive-operation pattern `{}`", matched.as_str()),
            sensitive: false,
            matcher_metadata: json!({
                "tool_name": call.tool_name,
                "matched_pattern": matched.as_str(),
                "preview": command,
            }),
            intercept: false,
        })
    }
}

fn sensitive_file_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"(^|/)\.env(\.|$)", r"\.pem$", r"\.key$", r"(^|/)id_rsa", r"credentials", r"(^|/)\.?password"]
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect()
    })
}

/// Gates every file-write, file-edit, and multi-edit call unconditionally.
/// If the target path also matches a sensitive-file pattern (env files,
/// keys, credentials, password files), the outcome is marked sensitive.
pub struct FileWriteMatcher {
    pub write_tool_names: Vec<String>,
}

impl ToolCallMatcher for FileWriteMatcher {
    fn applies_to(&self, tool_name: &str) -> bool {
        self.write_tool_names.iter().any(|t| t == tool_name)
    }

    fn evaluate(&self, call: &ToolCall) -> Option<MatchOutcome> {
        let path = call
            .input
            .get("path")
            .or_else(|| call.input.get("file_path"))
            .and_then(|v| v.as_str())
            .unwrap_or("<unknown path>");

        let sensitive = sensitive_file_patterns().iter().any(|re| re.is_match(path));

        Some(MatchOutcome {
            title: format!("File write: {path}"),
            summary: if sensitive {
                format!("Write to sensitive path {path}")
            } else {
                format!("Write to {path}")
            },
            sensitive,
            matcher_metadata: json!({ "tool_name": call.tool_name, "path": path }),
            intercept: false,
        })
    }
}

/// Gates a web-fetch tool whose URL's host matches a configured
/// high-risk-domain pattern set.
pub struct ExternalApiMatcher {
    pub fetch_tool_name: String,
    pub high_risk_domains: Vec<Regex>,
}

impl ToolCallMatcher for ExternalApiMatcher {
    fn applies_to(&self, tool_name: &str) -> bool {
        tool_name == self.fetch_tool_name
    }

    fn evaluate(&self, call: &ToolCall) -> Option<MatchOutcome> {
        let url = call.input.get("url").and_then(|v| v.as_str())?;
        let matched = self.high_risk_domains.iter().find(|re| re.is_match(url))?;

        Some(MatchOutcome {
            title: format!("External request: {url}"),
            summary: format!("URL matches high-risk domain pattern `{}`", matched.as_str()),
            sensitive: false,
            matcher_metadata: json!({ "tool_name": call.tool_name, "url": url, "matched_pattern": matched.as_str() }),
            intercept: false,
        })
    }
}

/// Intercepts user-question tool calls: the tool itself is never
/// executed. The questions are presented via the UI and the user's
/// answers become the tool's result, carried through `GateDecision::Intercepted`.
pub struct UserQuestionMatcher {
    pub question_tool_name: String,
}

impl ToolCallMatcher for UserQuestionMatcher {
    fn applies_to(&self, tool_name: &str) -> bool {
        tool_name == self.question_tool_name
    }

    fn evaluate(&self, call: &ToolCall) -> Option<MatchOutcome> {
        let questions = call.input.get("questions").cloned().unwrap_or(json!([]));
        Some(MatchOutcome {
            title: "User input requested".to_string(),
            summary: "Agent is asking the user a question".to_string(),
            sensitive: false,
            matcher_metadata: json!({ "tool_name": call.tool_name, "questions": questions }),
            intercept: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(tool_name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall { agent_id: "agent_1".into(), tool_name: tool_name.into(), input }
    }

    #[test]
    fn test_destructive_matcher_fires_on_rm_rf() {
        let matcher = DestructiveCommandMatcher { shell_tool_name: "shell".into() };
        let outcome = matcher.evaluate(&call("shell", json!({"command": "rm -rf /var/log/old"}))).unwrap();
        assert!(outcome.title.contains("rm -rf"));
    }

    #[test]
    fn test_destructive_matcher_ignores_benign_command() {
        let matcher = DestructiveCommandMatcher { shell_tool_name: "shell".into() };
        assert!(matcher.evaluate(&call("shell", json!({"command": "ls -la"}))).is_none());
    }

    #[test]
    fn test_file_write_matcher_gates_unconditionally() {
        let matcher = FileWriteMatcher { write_tool_names: vec!["file_write".into()] };
        let outcome = matcher.evaluate(&call("file_write", json!({"path": "README.md"}))).unwrap();
        assert!(!outcome.sensitive);
    }

    #[test]
    fn test_file_write_matcher_flags_sensitive_path() {
        let matcher = FileWriteMatcher { write_tool_names: vec!["file_write".into()] };
        let outcome = matcher.evaluate(&call("file_write", json!({"path": "/srv/app/.env"}))).unwrap();
        assert!(outcome.sensitive);
    }

    #[test]
    fn test_external_api_matcher_fires_on_high_risk_domain() {
        let matcher = ExternalApiMatcher {
            fetch_tool_name: "web_fetch".into(),
            high_risk_domains: vec![Regex::new(r"(?i)pastebin\.com").unwrap()],
        };
        let outcome = matcher.evaluate(&call("web_fetch", json!({"url": "https://pastebin.com/raw/x"}))).unwrap();
        assert!(outcome.title.contains("pastebin.com"));
    }

    #[test]
    fn test_external_api_matcher_ignores_safe_domain() {
        let matcher = ExternalApiMatcher {
            fetch_tool_name: "web_fetch".into(),
            high_risk_domains: vec![Regex::new(r"(?i)pastebin\.com").unwrap()],
        };
        assert!(matcher.evaluate(&call("web_fetch", json!({"url": "https://docs.rs/tokio"}))).is_none());
    }

    #[test]
    fn test_user_question_matcher_intercepts() {
        let matcher = UserQuestionMatcher { question_tool_name: "ask_user".into() };
        let outcome = matcher.evaluate(&call("ask_user", json!({"questions": ["proceed?"]}))).unwrap();
        assert!(outcome.intercept);
    }
}
