/**
 * Message Formatting (C7)
 *
 * Converts runtime-specific message shapes into the uniform bus format.
 * Kept as pure functions, separate from the stream pump, so the
 * icon/preview table can be unit-tested without a runtime or a bus.
 */
use serde_json::Value as JsonValue;

const PREVIEW_CHARS: usize = 100;
const SHELL_PREVIEW_CHARS: usize = 60;

pub fn text_preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Short icon tag plus a human preview string for a tool call: read/edit/
/// write show the last two path segments;
/// shell shows the command truncated to 60 chars; grep shows the pattern
/// and a path hint; web-search shows the query; web-fetch shows the
/// domain. Unrecognized tools fall back to a generic tag and the tool name.
pub fn tool_icon_and_preview(tool_name: &str, input: &JsonValue) -> (&'static str, String) {
    match tool_name {
        "read" | "edit" | "write" | "multi_edit" => {
            let path = input.get("path").or_else(|| input.get("file_path")).and_then(|v| v.as_str()).unwrap_or("");
            ("file", last_two_segments(path))
        }
        "shell" | "bash" => {
            let command = input.get("command").and_then(|v| v.as_str()).unwrap_or("");
            ("shell", truncate(command, SHELL_PREVIEW_CHARS))
        }
        "grep" => {
            let pattern = input.get("pattern").and_then(|v| v.as_str()).unwrap_or("");
            let path = input.get("path").and_then(|v| v.as_str());
            let preview = match path {
                Some(p) => format!("{pattern} in {p}"),
                None => pattern.to_string(),
            };
            ("grep", preview)
        }
        "web_search" => {
            let query = input.get("query").and_then(|v| v.as_str()).unwrap_or("");
            ("search", query.to_string())
        }
        "web_fetch" => {
            let url = input.get("url").and_then(|v| v.as_str()).unwrap_or("");
            ("fetch", domain_of(url))
        }
        other => ("tool", other.to_string()),
    }
}

fn last_two_segments(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.len() <= 2 {
        parts.join("/")
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

fn domain_of(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}

/// Tool names the workflow tracker treats as code-changing.
pub fn is_code_change_tool(tool_name: &str) -> bool {
    matches!(tool_name, "edit" | "write" | "multi_edit")
}
