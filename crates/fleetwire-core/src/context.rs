//! Execution identity passed explicitly into pipeline calls.
//!
//! Pipeline workers act on behalf of the platform rather than an operator,
//! so every queue worker is constructed with a system [`ExecutionContext`]
//! and hands it to each downstream call that writes through management.

use serde::{Deserialize, Serialize};

/// Default principal used by pipeline workers.
pub const SYSTEM_PRINCIPAL: &str = "system";

/// Identity under which a pipeline operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Principal name recorded on created entities
    pub principal: String,
    /// Granted authorities
    pub authorities: Vec<String>,
    /// Whether this is a platform (non-user) identity
    pub system: bool,
}

impl ExecutionContext {
    /// System identity with the default principal.
    pub fn system() -> Self {
        Self::system_as(SYSTEM_PRINCIPAL)
    }

    /// System identity with a custom principal name.
    pub fn system_as(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            authorities: vec!["ADMINISTER_DEVICES".to_string(), "ADMINISTER_SITES".to_string()],
            system: true,
        }
    }

    /// Identity of an end user.
    pub fn user(principal: impl Into<String>, authorities: Vec<String>) -> Self {
        Self {
            principal: principal.into(),
            authorities,
            system: false,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// True if `authority` was granted to this context.
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_context() {
        let ctx = ExecutionContext::system();
        assert!(ctx.system);
        assert_eq!(ctx.principal(), "system");
        assert!(ctx.has_authority("ADMINISTER_DEVICES"));

        let user = ExecutionContext::user("alice", vec![]);
        assert!(!user.system);
        assert!(!user.has_authority("ADMINISTER_DEVICES"));
    }
}
