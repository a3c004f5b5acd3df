/**
 * Error Handling Module
 *
 * DESIGN DECISION: Centralized error types using thiserror for consistent error semantics
 * WHY: Library code must never panic; all errors returned as Result so worker processes
 * can decide per-kind whether to retry, surface to the approval waiter, or fail the job.
 *
 * REASONING CHAIN:
 * 1. Six error kinds map 1:1 onto an HTTP status a caller would assign them.
 * 2. Best-effort paths (pub/sub, embeddings, status hints) only ever see Transient.
 * 3. thiserror generates Display without hand-written boilerplate.
 * 4. Error conversion (From trait) enables ? across rusqlite/serde_json/tokio boundaries.
 *
 * PATTERN: Pattern-001 (centralized error taxonomy)
 */
use thiserror::Error;

/// Primary error type for Sibyl core operations.
///
/// Each variant corresponds to one error kind from the taxonomy: NotFound,
/// InvalidInput, ConflictOrDuplicate, TransitionForbidden, Transient, Fatal.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Entity or edge absent, or present under a different tenant. 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request or validation failure. 400.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Idempotent-safe conflict: duplicate id, duplicate edge, concurrent transition. 409.
    #[error("conflict: {0}")]
    ConflictOrDuplicate(String),

    /// State machine rejects the requested transition. 422.
    #[error("transition forbidden: {0}")]
    TransitionForbidden(String),

    /// Connectivity to graph/LLM/embedder; caller may retry with backoff. 503.
    #[error("transient error: {0}")]
    Transient(String),

    /// Programming error or malformed stored state. 500; log and abort the job.
    #[error("fatal error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("serialization error: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transient(format!("io error: {err}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound("no matching row".to_string()),
            other => Error::Transient(format!("storage error: {other}")),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Transient("operation timed out".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("entity ent_1".to_string());
        assert_eq!(err.to_string(), "not found: entity ent_1");
    }

    #[test]
    fn test_error_conversion_from_rusqlite() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_error_conversion_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
