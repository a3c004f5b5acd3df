/**
 * Configuration Validator
 *
 * DESIGN DECISION: Collect every validation issue instead of failing on
 * the first, matching the teacher's validator pattern.
 * WHY: Operators fixing a bad config file want the whole list in one
 * pass, not a fix-rerun-fix loop.
 */
use super::SibylConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

pub type ValidationResult = Result<(), Vec<ValidationIssue>>;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &SibylConfig) -> ValidationResult {
        let mut issues = Vec::new();

        if config.approval_expiry_secs == 0 {
            issues.push(ValidationIssue { field: "approval_expiry_secs", message: "must be nonzero".to_string() });
        }
        if config.approval_wait_timeout_secs == 0 {
            issues.push(ValidationIssue { field: "approval_wait_timeout_secs", message: "must be nonzero".to_string() });
        }
        if config.question_wait_timeout_secs == 0 {
            issues.push(ValidationIssue { field: "question_wait_timeout_secs", message: "must be nonzero".to_string() });
        }
        if config.job_default_timeout_secs == 0 {
            issues.push(ValidationIssue { field: "job_default_timeout_secs", message: "must be nonzero".to_string() });
        }
        if config.job_worker_concurrency == 0 {
            issues.push(ValidationIssue { field: "job_worker_concurrency", message: "must allow at least one concurrent job".to_string() });
        }
        if config.bus_channel_capacity == 0 {
            issues.push(ValidationIssue { field: "bus_channel_capacity", message: "must be nonzero".to_string() });
        }
        if config.graph_base_dir.trim().is_empty() {
            issues.push(ValidationIssue { field: "graph_base_dir", message: "must not be empty".to_string() });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&SibylConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_multiple_issues() {
        let mut config = SibylConfig::default();
        config.job_worker_concurrency = 0;
        config.bus_channel_capacity = 0;
        let issues = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(issues.len(), 2);
    }
}
