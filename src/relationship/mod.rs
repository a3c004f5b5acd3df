/**
 * C3 — Relationship Manager
 *
 * Typed directed edges over the same tenant-isolated graph store as C2.
 * Edge identity is `(source, target, kind)`.
 */
mod manager;
mod types;

pub use manager::RelationshipManager;
pub use types::{Direction, Relationship, RelationshipKind};
