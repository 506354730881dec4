/// Shared types used across the codebase

use serde::{Deserialize, Serialize};

use crate::access::RolePermission;

/// Record operations exposed by the data API.
/// Every request is classified as exactly one of these before authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Minimum permission a grant must reach to cover this operation
    pub fn required_permission(&self) -> RolePermission {
        match self {
            Operation::Read => RolePermission::Read,
            Operation::Create | Operation::Update => RolePermission::Write,
            Operation::Delete => RolePermission::Delete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
