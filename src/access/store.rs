use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

use super::model::{PublicTableAccess, Role, TableRole, TableRules};
use super::permission::RolePermission;
use crate::database::manager::{DatabaseError, DatabaseManager};

/// Source of permission rows
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Load the rules that apply to `role` (None for anonymous callers) on `table`
    async fn rules_for(&self, role: Option<&str>, table: &str) -> Result<TableRules, DatabaseError>;

    /// Drop any cached state
    async fn invalidate(&self) {}
}

/// Fixed rule set held in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryPermissionStore {
    roles: HashMap<String, Role>,
    table_roles: HashMap<(String, String), TableRole>,
    public: HashMap<String, PublicTableAccess>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role.name.clone(), role);
        self
    }

    pub fn with_table_role(mut self, table_role: TableRole) -> Self {
        self.table_roles
            .insert((table_role.role.clone(), table_role.table.clone()), table_role);
        self
    }

    pub fn with_public(mut self, access: PublicTableAccess) -> Self {
        self.public.insert(access.table.clone(), access);
        self
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn rules_for(&self, role: Option<&str>, table: &str) -> Result<TableRules, DatabaseError> {
        Ok(TableRules {
            public: self.public.get(table).cloned(),
            role: role.and_then(|r| self.roles.get(r)).cloned(),
            table_role: role.and_then(|r| self.table_roles.get(&(r.to_string(), table.to_string()))).cloned(),
        })
    }
}

/// Permission rows stored in the `_api_*` tables
pub struct PgPermissionStore {
    pool: PgPool,
    schema: String,
}

impl PgPermissionStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self { pool, schema: schema.into() }
    }

    fn table(&self, name: &str) -> String {
        format!(
            "{}.{}",
            DatabaseManager::quote_identifier(&self.schema),
            DatabaseManager::quote_identifier(name)
        )
    }

    /// Create the permission tables when they are missing
    pub async fn bootstrap(&self) -> Result<(), DatabaseError> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    role TEXT PRIMARY KEY,
                    records TEXT NOT NULL DEFAULT 'NONE'
                )",
                self.table("_api_roles")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    role TEXT NOT NULL,
                    table_name TEXT NOT NULL,
                    identity_column TEXT,
                    records TEXT NOT NULL DEFAULT 'NONE',
                    own_records TEXT NOT NULL DEFAULT 'NONE',
                    allowed_fields TEXT[] NOT NULL DEFAULT '{{}}',
                    restricted_fields TEXT[] NOT NULL DEFAULT '{{}}',
                    UNIQUE (role, table_name)
                )",
                self.table("_api_table_roles")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    table_name TEXT PRIMARY KEY,
                    access_level TEXT NOT NULL DEFAULT 'READ',
                    allowed_fields TEXT[] NOT NULL DEFAULT '{{}}'
                )",
                self.table("_api_public_tables")
            ),
        ];

        for statement in statements.iter() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Permission tables ready in schema '{}'", self.schema);
        Ok(())
    }

    async fn load_public(&self, table: &str) -> Result<Option<PublicTableAccess>, DatabaseError> {
        let sql = format!(
            "SELECT table_name, access_level, allowed_fields FROM {} WHERE table_name = $1",
            self.table("_api_public_tables")
        );
        let row = sqlx::query(&sql).bind(table).fetch_optional(&self.pool).await?;
        Ok(row.map(|row| PublicTableAccess {
            table: row.get("table_name"),
            access_level: RolePermission::parse_lenient(row.get::<String, _>("access_level").as_str()),
            allowed_fields: row.get("allowed_fields"),
        }))
    }

    async fn load_role(&self, role: &str) -> Result<Option<Role>, DatabaseError> {
        let sql = format!("SELECT role, records FROM {} WHERE role = $1", self.table("_api_roles"));
        let row = sqlx::query(&sql).bind(role).fetch_optional(&self.pool).await?;
        Ok(row.map(|row| Role {
            name: row.get("role"),
            records: RolePermission::parse_lenient(row.get::<String, _>("records").as_str()),
        }))
    }

    async fn load_table_role(&self, role: &str, table: &str) -> Result<Option<TableRole>, DatabaseError> {
        let sql = format!(
            "SELECT role, table_name, identity_column, records, own_records, allowed_fields, restricted_fields
             FROM {} WHERE role = $1 AND table_name = $2",
            self.table("_api_table_roles")
        );
        let row = sqlx::query(&sql)
            .bind(role)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| TableRole {
            role: row.get("role"),
            table: row.get("table_name"),
            identity_column: row.get("identity_column"),
            records: RolePermission::parse_lenient(row.get::<String, _>("records").as_str()),
            own_records: RolePermission::parse_lenient(row.get::<String, _>("own_records").as_str()),
            allowed_fields: row.get("allowed_fields"),
            restricted_fields: row.get("restricted_fields"),
        }))
    }
}

#[async_trait]
impl PermissionStore for PgPermissionStore {
    async fn rules_for(&self, role: Option<&str>, table: &str) -> Result<TableRules, DatabaseError> {
        let public = self.load_public(table).await?;
        let (role, table_role) = match role {
            Some(role) => futures::try_join!(self.load_role(role), self.load_table_role(role, table))?,
            None => (None, None),
        };
        Ok(TableRules { public, role, table_role })
    }
}

type RulesKey = (Option<String>, String);

/// TTL cache in front of another store
pub struct CachedPermissionStore<S> {
    inner: S,
    ttl: Duration,
    entries: Arc<RwLock<HashMap<RulesKey, (Instant, TableRules)>>>,
}

impl<S: PermissionStore> CachedPermissionStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl<S: PermissionStore> PermissionStore for CachedPermissionStore<S> {
    async fn rules_for(&self, role: Option<&str>, table: &str) -> Result<TableRules, DatabaseError> {
        if self.ttl.is_zero() {
            return self.inner.rules_for(role, table).await;
        }

        let key: RulesKey = (role.map(str::to_string), table.to_string());

        // Fast path: try read lock
        {
            let entries = self.entries.read().await;
            if let Some((loaded_at, rules)) = entries.get(&key) {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(rules.clone());
                }
            }
        }

        let rules = self.inner.rules_for(role, table).await?;
        {
            let mut entries = self.entries.write().await;
            entries.insert(key, (Instant::now(), rules.clone()));
        }
        Ok(rules)
    }

    async fn invalidate(&self) {
        self.entries.write().await.clear();
        self.inner.invalidate().await;
    }
}
