//! Caller identity and capability checks.
//!
//! Token introspection happens outside the core; what arrives here is a
//! resolved [`Principal`] carrying the subject name used for maker/checker
//! attribution and the set of granted permissions.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;

use crate::error::GovernanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ManageFields,
    AuthorRules,
    ApproveRules,
    ActivateRulesets,
    PublishRegistry,
    ReadAudit,
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    permissions: HashSet<Permission>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            subject: subject.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), GovernanceError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(GovernanceError::Forbidden {
                message: format!("{} lacks required permission", self.subject),
                details: Some(json!({
                    "subject": self.subject,
                    "permission": permission,
                })),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_passes_with_grant() {
        let principal = Principal::new("maker-1", [Permission::AuthorRules]);
        assert!(principal.require(Permission::AuthorRules).is_ok());
    }

    #[test]
    fn require_fails_without_grant() {
        let principal = Principal::new("maker-1", [Permission::AuthorRules]);
        let err = principal.require(Permission::ApproveRules).unwrap_err();
        assert_eq!(err.kind(), "ForbiddenError");
    }
}
