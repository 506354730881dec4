use serde_json::{Map, Value};
use std::collections::HashMap;

use super::fields::FieldPolicy;
use super::model::{Caller, Identity, TableRules};
use super::permission::RolePermission;
use crate::types::Operation;

/// Prefix of the tables that hold permission rows
pub const SYSTEM_TABLE_PREFIX: &str = "_api_";

/// Which rows a grant reaches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordScope {
    All,
    Own { column: String, owner_id: String },
}

/// Outcome of a successful authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub table: String,
    pub operation: Operation,
    pub permission: RolePermission,
    pub scope: RecordScope,
    pub fields: FieldPolicy,
}

impl AccessGrant {
    /// (column, owner id) when the grant is limited to the caller's rows
    pub fn owner_condition(&self) -> Option<(&str, &str)> {
        match &self.scope {
            RecordScope::All => None,
            RecordScope::Own { column, owner_id } => Some((column.as_str(), owner_id.as_str())),
        }
    }

    pub fn is_own_scope(&self) -> bool {
        matches!(self.scope, RecordScope::Own { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("Authentication required to {operation} records in '{table}'")]
    Unauthenticated { table: String, operation: Operation },

    #[error("Role '{role}' may not {operation} records in '{table}'")]
    Forbidden { table: String, role: String, operation: Operation },

    #[error("Record in '{table}' does not belong to the caller")]
    NotOwner { table: String },

    #[error("Table '{table}' has no ownership column '{column}'")]
    MissingOwnershipColumn { table: String, column: String },

    #[error("Field '{field}' of '{table}' is not accessible")]
    FieldNotPermitted { table: String, field: String },

    #[error("Table '{0}' is not exposed")]
    SystemTable(String),
}

/// Permission resolution over a loaded [`TableRules`] snapshot.
///
/// Pure: all I/O happens in the permission store before `decide` runs.
#[derive(Debug, Clone)]
pub struct AccessEngine {
    default_identity_column: String,
    hidden_fields: HashMap<String, Vec<String>>,
}

impl AccessEngine {
    pub fn new(default_identity_column: impl Into<String>) -> Self {
        Self {
            default_identity_column: default_identity_column.into(),
            hidden_fields: HashMap::new(),
        }
    }

    /// Fields of `table` that are restricted for every caller
    pub fn with_hidden_fields<I, S>(mut self, table: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_fields
            .entry(table.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn from_config(auth: &crate::config::AuthConfig) -> Self {
        Self::new(auth.identity_column.clone()).with_hidden_fields(auth.user_table.clone(), auth.secret_columns())
    }

    pub fn default_identity_column(&self) -> &str {
        &self.default_identity_column
    }

    /// Reject direct access to the permission tables
    pub fn ensure_exposed(table: &str) -> Result<(), AccessDenied> {
        if table.starts_with(SYSTEM_TABLE_PREFIX) {
            return Err(AccessDenied::SystemTable(table.to_string()));
        }
        Ok(())
    }

    /// Decide whether `caller` may perform `operation` on `table`
    pub fn decide(
        &self,
        caller: &Caller,
        table: &str,
        operation: Operation,
        rules: &TableRules,
    ) -> Result<AccessGrant, AccessDenied> {
        Self::ensure_exposed(table)?;

        let outcome = match caller {
            Caller::Anonymous => self
                .public_grant(table, operation, rules)
                .ok_or_else(|| AccessDenied::Unauthenticated {
                    table: table.to_string(),
                    operation,
                }),
            Caller::Authenticated(identity) => self
                .role_grant(identity, table, operation, rules)
                .or_else(|| self.public_grant(table, operation, rules))
                .ok_or_else(|| AccessDenied::Forbidden {
                    table: table.to_string(),
                    role: identity.role.clone(),
                    operation,
                }),
        };

        match &outcome {
            Ok(grant) => tracing::debug!(
                "Access granted: {} {} on '{}' ({}, {:?})",
                caller.label(),
                operation,
                table,
                grant.permission,
                grant.scope
            ),
            Err(denied) => tracing::warn!("Access denied for {}: {}", caller.label(), denied),
        }
        outcome
    }

    fn public_grant(&self, table: &str, operation: Operation, rules: &TableRules) -> Option<AccessGrant> {
        let public = rules.public.as_ref()?;
        if !public.access_level.covers(operation.required_permission()) {
            return None;
        }
        Some(AccessGrant {
            table: table.to_string(),
            operation,
            permission: public.access_level,
            scope: RecordScope::All,
            fields: self.field_policy(table, &public.allowed_fields, &[]),
        })
    }

    fn role_grant(
        &self,
        identity: &Identity,
        table: &str,
        operation: Operation,
        rules: &TableRules,
    ) -> Option<AccessGrant> {
        let required = operation.required_permission();

        // Table role when present, otherwise the role's default permission
        let (records, own_records, identity_column, fields) = match &rules.table_role {
            Some(table_role) => (
                table_role.records,
                table_role.own_records,
                table_role.identity_column.clone(),
                self.field_policy(table, &table_role.allowed_fields, &table_role.restricted_fields),
            ),
            None => (
                rules.role.as_ref().map(|r| r.records).unwrap_or_default(),
                RolePermission::None,
                None,
                self.field_policy(table, &[], &[]),
            ),
        };

        if records.covers(required) {
            return Some(AccessGrant {
                table: table.to_string(),
                operation,
                permission: records,
                scope: RecordScope::All,
                fields,
            });
        }

        if own_records.covers(required) {
            let column = identity_column.unwrap_or_else(|| self.default_identity_column.clone());
            return Some(AccessGrant {
                table: table.to_string(),
                operation,
                permission: own_records,
                scope: RecordScope::Own {
                    column,
                    owner_id: identity.id.clone(),
                },
                fields,
            });
        }

        None
    }

    fn field_policy(&self, table: &str, allowed: &[String], restricted: &[String]) -> FieldPolicy {
        let policy = FieldPolicy::from_lists(allowed, restricted);
        match self.hidden_fields.get(table) {
            Some(hidden) => policy.with_restricted(hidden.iter().cloned()),
            None => policy,
        }
    }

    /// Verify an existing row falls inside the grant's scope
    pub fn check_row(grant: &AccessGrant, row: &Map<String, Value>) -> Result<(), AccessDenied> {
        let Some((column, owner_id)) = grant.owner_condition() else {
            return Ok(());
        };
        match row.get(column).and_then(value_as_text) {
            Some(value) if value == owner_id => Ok(()),
            _ => Err(AccessDenied::NotOwner { table: grant.table.clone() }),
        }
    }

    /// Prepare input for an own-scope write: stamp the owner on create and
    /// refuse any attempt to name a different owner.
    pub fn stamp_owner(grant: &AccessGrant, input: &mut Map<String, Value>) -> Result<(), AccessDenied> {
        let Some((column, owner_id)) = grant.owner_condition() else {
            return Ok(());
        };
        match input.get(column) {
            None | Some(Value::Null) if grant.operation == Operation::Create => {
                input.insert(column.to_string(), Value::String(owner_id.to_string()));
                Ok(())
            }
            None => Ok(()),
            Some(value) if value_as_text(value).as_deref() == Some(owner_id) => Ok(()),
            Some(_) => Err(AccessDenied::NotOwner { table: grant.table.clone() }),
        }
    }

    /// Reject input naming a field the grant does not cover
    pub fn check_input_fields(grant: &AccessGrant, input: &Map<String, Value>) -> Result<(), AccessDenied> {
        match grant.fields.denied_input_fields(input).into_iter().next() {
            Some(field) => Err(AccessDenied::FieldNotPermitted {
                table: grant.table.clone(),
                field,
            }),
            None => Ok(()),
        }
    }
}

/// Text form of a scalar JSON value, as Postgres would print it
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
