/**
 * External collaborator seams for the Entity Manager.
 *
 * Both the embedder and the extraction collaborator are genuinely external
 * systems (an LLM, an embedding model) that this crate does not implement.
 * Each is a trait so a caller can plug in a real implementation; the
 * default here is a deterministic no-op, matching the teacher's pattern of
 * keeping heavyweight ML dependencies behind a pluggable collaborator
 * rather than vendoring them (c.f. the commented-out `ort`/`tokenizers`
 * dependencies in the teacher's own Cargo.toml).
 */
use crate::error::Result;
use async_trait::async_trait;

use super::types::Entity;

/// Computes a vector embedding for arbitrary text. Failure here must never
/// fail the entity create/update it's attached to.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// No embedding model wired up; every embed call fails with `Transient` so
/// callers treat it exactly like a real embedder being temporarily down.
pub struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(crate::error::Error::Transient(
            "no embedder configured".to_string(),
        ))
    }
}

/// Discovers implicit related entities/edges from an entity's free-form
/// content. Used only by the `create` ("extraction path") operation.
#[async_trait]
pub trait ExtractionCollaborator: Send + Sync {
    /// Returns ids of any additional entities/edges the collaborator chose
    /// to create as a side effect. The caller's entity id is never altered
    /// by this call even if the collaborator assigns its own transient id
    /// internally.
    async fn extract(&self, entity: &Entity) -> Result<Vec<String>>;
}

/// Deterministic no-op: discovers nothing. This is the default collaborator
/// for this crate, which does not embed an LLM.
pub struct NoopExtractionCollaborator;

#[async_trait]
impl ExtractionCollaborator for NoopExtractionCollaborator {
    async fn extract(&self, _entity: &Entity) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::types::EntityKind;

    #[tokio::test]
    async fn test_null_embedder_is_transient_failure() {
        let err = NullEmbedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Transient(_)));
    }

    #[tokio::test]
    async fn test_noop_extraction_discovers_nothing() {
        let e = Entity::new("e1", "t1", EntityKind::Note, "n");
        let discovered = NoopExtractionCollaborator.extract(&e).await.unwrap();
        assert!(discovered.is_empty());
    }
}
