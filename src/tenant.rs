/**
 * Tenant Identity
 *
 * DESIGN DECISION: Newtype wrapper around a plain string rather than a bare String
 * WHY: Every query in C1-C4 takes a tenant; a newtype stops an entity id or job id
 * from being passed where a tenant id is expected at the type level.
 */
use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation boundary: a logical organization with its own graph namespace and
/// its own pub/sub topics. No query ever crosses tenants (§3 invariant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_equality() {
        assert_eq!(TenantId::new("t1"), TenantId::from("t1"));
        assert_ne!(TenantId::new("t1"), TenantId::new("t2"));
    }

    #[test]
    fn test_tenant_display() {
        assert_eq!(TenantId::new("acme").to_string(), "acme");
    }
}
