/**
 * Query and content sanitization for keyword search.
 *
 * Two distinct sanitizers:
 * - `sanitize_query` strips characters that would otherwise be treated as
 *   control tokens by a full-text grammar, kept as a guard even though this
 *   crate's search does plain substring containment rather than a real FTS
 *   engine (idempotent: sanitizing twice is the same as once).
 * - `sanitize_episode_body` strips markdown noise from episode content
 *   before it's indexed, while the original text stays on the entity.
 */
use regex::Regex;
use std::sync::OnceLock;

const QUERY_CONTROL_CHARS: &[char] = &['|', '&', '-', '@', '(', ')', '~', '$', ':', '*', '\\', '/'];

/// Replace characters that a full-text query grammar would treat as control
/// tokens with spaces. Idempotent by construction: none of
/// `QUERY_CONTROL_CHARS` survive a single pass, so a second pass is a no-op.
pub fn sanitize_query(query: &str) -> String {
    query
        .chars()
        .map(|c| if QUERY_CONTROL_CHARS.contains(&c) { ' ' } else { c })
        .collect()
}

fn emphasis_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[*_]{1,3}").unwrap())
}

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\[\]{}`]").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Strip markdown emphasis markers and bracket-like characters for
/// full-text indexing. The original `content` field on the entity is left
/// untouched by callers; this only governs what gets indexed.
pub fn sanitize_episode_body(text: &str) -> String {
    let no_emphasis = emphasis_re().replace_all(text, " ");
    let no_brackets = bracket_re().replace_all(&no_emphasis, " ");
    whitespace_re().replace_all(&no_brackets, " ").trim().to_string()
}
