use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use crate::config::AuthConfig;
use crate::database::manager::{DatabaseError, DatabaseManager};

/// Credential-bearing row of the auth user table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub role: Option<String>,
    pub password_hash: Option<String>,
}

/// Lookup of users for login and API-key authentication
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DatabaseError>;

    /// `key` is already in stored form (hashed when configured)
    async fn find_by_api_key(&self, key: &str) -> Result<Option<UserRecord>, DatabaseError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError>;
}

/// Users read from the configured auth table
pub struct PgUserStore {
    pool: PgPool,
    schema: String,
    auth: AuthConfig,
}

impl PgUserStore {
    pub fn new(pool: PgPool, schema: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            pool,
            schema: schema.into(),
            auth,
        }
    }

    fn select_by(&self, column: &str) -> String {
        let q = DatabaseManager::quote_identifier;
        format!(
            "SELECT {}::text AS id, {}::text AS role, {}::text AS password FROM {}.{} WHERE {}::text = $1 LIMIT 1",
            q(&self.auth.id_column),
            q(&self.auth.role_column),
            q(&self.auth.password_column),
            q(&self.schema),
            q(&self.auth.user_table),
            q(column),
        )
    }

    async fn fetch(&self, column: &str, value: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let sql = self.select_by(column);
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            role: row.get("role"),
            password_hash: row.get("password"),
        }))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DatabaseError> {
        self.fetch(&self.auth.username_column, username).await
    }

    async fn find_by_api_key(&self, key: &str) -> Result<Option<UserRecord>, DatabaseError> {
        match &self.auth.api_key_column {
            Some(column) => self.fetch(column, key).await,
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        self.fetch(&self.auth.id_column, id).await
    }
}

/// Fixed user set held in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryUserStore {
    by_username: HashMap<String, UserRecord>,
    by_api_key: HashMap<String, UserRecord>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, user: UserRecord) -> Self {
        self.by_username.insert(username.into(), user);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>, user: UserRecord) -> Self {
        self.by_api_key.insert(key.into(), user);
        self
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DatabaseError> {
        Ok(self.by_username.get(username).cloned())
    }

    async fn find_by_api_key(&self, key: &str) -> Result<Option<UserRecord>, DatabaseError> {
        Ok(self.by_api_key.get(key).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        Ok(self
            .by_username
            .values()
            .chain(self.by_api_key.values())
            .find(|user| user.id == id)
            .cloned())
    }
}
