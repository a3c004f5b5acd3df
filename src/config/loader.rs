/**
 * Configuration Loader
 *
 * DESIGN DECISION: Layered resolution — built-in defaults, then an
 * optional TOML file, then environment variable overrides, last one wins.
 * WHY: Workers and the worker binary need the same knobs (graph path,
 * timeouts, concurrency) resolvable without a config file in tests and
 * overridable in deployment without editing a file.
 *
 * REASONING CHAIN:
 * 1. Defaults must always produce a usable config (no required fields).
 * 2. A TOML file at a caller-supplied path overrides the defaults it
 *    mentions; a missing file is not an error.
 * 3. `SIBYL_*` environment variables override whatever the file set,
 *    since operators commonly pin per-environment values via env rather
 *    than shipping per-environment files.
 * 4. `ConfigValidator` (validator.rs) runs last and rejects nonsensical
 *    values (zero timeouts, zero concurrency, out-of-range weights)
 *    collecting every issue rather than failing on the first.
 */
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level Sibyl configuration: graph store location, approval/question
/// timeouts, job queue sizing, message bus channel capacity, and embedding
/// dimensionality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SibylConfig {
    /// Base directory for per-tenant graph store files (C1).
    pub graph_base_dir: String,
    /// Default approval wait deadline, in seconds (spec: 24h for the
    /// approval entity's `expires_at`; the waiter's own deadline is
    /// shorter — see `approval_wait_timeout_secs`).
    pub approval_expiry_secs: u64,
    /// Deadline a gate-approval waiter blocks for before synthesizing a
    /// denial (spec: 5 minutes).
    pub approval_wait_timeout_secs: u64,
    /// Deadline a user-question waiter blocks for (spec: 30 minutes).
    pub question_wait_timeout_secs: u64,
    /// Default per-job timeout for the job queue (spec: 1h, appropriate
    /// for crawls).
    pub job_default_timeout_secs: u64,
    /// Concurrent jobs per worker process (spec: default 3).
    pub job_worker_concurrency: usize,
    /// Capacity of each per-tenant broadcast channel (C4). Slow
    /// subscribers that fall behind this many messages see a lag error
    /// rather than blocking publishers.
    pub bus_channel_capacity: usize,
    /// Dimensionality the embedder is expected to return; used only for
    /// config validation (C2 does not itself enforce vector length).
    pub embedding_dimensions: usize,
}

impl Default for SibylConfig {
    fn default() -> Self {
        Self {
            graph_base_dir: "./data/graph".to_string(),
            approval_expiry_secs: 24 * 60 * 60,
            approval_wait_timeout_secs: 5 * 60,
            question_wait_timeout_secs: 30 * 60,
            job_default_timeout_secs: 60 * 60,
            job_worker_concurrency: 3,
            bus_channel_capacity: 256,
            embedding_dimensions: 1536,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads defaults, merges in `path` if it exists, then applies
    /// `SIBYL_*` environment overrides. Does not validate; call
    /// `ConfigValidator::validate` on the result.
    pub fn load(path: Option<&Path>) -> Result<SibylConfig> {
        let mut config = SibylConfig::default();

        if let Some(path) = path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)?;
                let from_file: TomlOverrides = toml::from_str(&raw)
                    .map_err(|e| Error::InvalidInput(format!("invalid config file {}: {e}", path.display())))?;
                from_file.apply(&mut config);
            }
        }

        Self::apply_env(&mut config);
        Ok(config)
    }

    fn apply_env(config: &mut SibylConfig) {
        if let Ok(v) = std::env::var("SIBYL_GRAPH_BASE_DIR") {
            config.graph_base_dir = v;
        }
        if let Ok(v) = std::env::var("SIBYL_APPROVAL_EXPIRY_SECS") {
            if let Ok(n) = v.parse() {
                config.approval_expiry_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SIBYL_APPROVAL_WAIT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.approval_wait_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SIBYL_QUESTION_WAIT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.question_wait_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SIBYL_JOB_DEFAULT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.job_default_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SIBYL_JOB_WORKER_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                config.job_worker_concurrency = n;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TomlOverrides {
    graph_base_dir: Option<String>,
    approval_expiry_secs: Option<u64>,
    approval_wait_timeout_secs: Option<u64>,
    question_wait_timeout_secs: Option<u64>,
    job_default_timeout_secs: Option<u64>,
    job_worker_concurrency: Option<usize>,
    bus_channel_capacity: Option<usize>,
    embedding_dimensions: Option<usize>,
}

impl TomlOverrides {
    fn apply(self, config: &mut SibylConfig) {
        if let Some(v) = self.graph_base_dir {
            config.graph_base_dir = v;
        }
        if let Some(v) = self.approval_expiry_secs {
            config.approval_expiry_secs = v;
        }
        if let Some(v) = self.approval_wait_timeout_secs {
            config.approval_wait_timeout_secs = v;
        }
        if let Some(v) = self.question_wait_timeout_secs {
            config.question_wait_timeout_secs = v;
        }
        if let Some(v) = self.job_default_timeout_secs {
            config.job_default_timeout_secs = v;
        }
        if let Some(v) = self.job_worker_concurrency {
            config.job_worker_concurrency = v;
        }
        if let Some(v) = self.bus_channel_capacity {
            config.bus_channel_capacity = v;
        }
        if let Some(v) = self.embedding_dimensions {
            config.embedding_dimensions = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_usable() {
        let config = SibylConfig::default();
        assert!(config.job_worker_concurrency > 0);
        assert!(config.approval_wait_timeout_secs > 0);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = ConfigLoader::load(Some(Path::new("/nonexistent/sibyl.toml"))).unwrap();
        assert_eq!(config.graph_base_dir, SibylConfig::default().graph_base_dir);
    }

    #[test]
    fn test_load_merges_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sibyl.toml");
        std::fs::write(&path, "job_worker_concurrency = 7\n").unwrap();
        let config = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(config.job_worker_concurrency, 7);
        assert_eq!(config.graph_base_dir, SibylConfig::default().graph_base_dir);
    }
}
