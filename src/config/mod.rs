/**
 * Configuration (ambient stack)
 *
 * Layered `SibylConfig`: built-in defaults, optional TOML file, then
 * `SIBYL_*` environment overrides. Validated by a separate
 * `ConfigValidator` pass that collects every issue rather than failing
 * fast, mirroring the teacher's config/validator.rs split between data
 * representation and validation.
 */
pub mod loader;
pub mod validator;

pub use loader::{ConfigLoader, SibylConfig};
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult};
