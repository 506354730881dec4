use serde::{Deserialize, Serialize};

use super::permission::RolePermission;

/// Role with its default table-wide permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub records: RolePermission,
}

/// Per-table grant for a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRole {
    pub role: String,
    pub table: String,
    /// Ownership column for own-record checks; the configured default when absent
    pub identity_column: Option<String>,
    pub records: RolePermission,
    pub own_records: RolePermission,
    #[serde(default)]
    pub allowed_fields: Vec<String>,
    #[serde(default)]
    pub restricted_fields: Vec<String>,
}

/// Grant for unauthenticated callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicTableAccess {
    pub table: String,
    pub access_level: RolePermission,
    #[serde(default)]
    pub allowed_fields: Vec<String>,
}

/// Everything the decision engine needs for one (role, table) pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRules {
    pub public: Option<PublicTableAccess>,
    pub role: Option<Role>,
    pub table_role: Option<TableRole>,
}

/// How the caller authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Jwt,
    ApiKey,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub role: String,
    pub method: AuthMethod,
}

/// Request principal, injected by the identity middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Authenticated(Identity),
}

impl Caller {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated(identity) => Some(identity),
        }
    }

    pub fn role(&self) -> Option<&str> {
        self.identity().map(|i| i.role.as_str())
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        match self {
            Caller::Anonymous => "anonymous".to_string(),
            Caller::Authenticated(identity) => format!("{}:{}", identity.role, identity.id),
        }
    }
}
