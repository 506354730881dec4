use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub pagination: PaginationConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub default_limit: i64,
    pub max_limit: i64,
    pub max_relations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres schema whose tables are exposed
    pub schema: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
    /// Create the `_api_*` permission tables at startup
    pub bootstrap: bool,
    /// Column used for soft deletes, when a table carries it
    pub soft_delete_column: Option<String>,
    pub schema_cache_secs: u64,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_expiry_hours: u64,
    pub permission_cache_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Table holding the users that can authenticate
    pub user_table: String,
    pub id_column: String,
    pub username_column: String,
    pub password_column: String,
    pub role_column: String,
    pub api_key_column: Option<String>,
    pub api_key_header: String,
    /// API keys are stored as SHA-256 hex digests
    pub api_key_hashed: bool,
    pub default_role: String,
    /// Ownership column used when a table role does not name one
    pub identity_column: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Pagination overrides
        if let Ok(v) = env::var("PAGINATION_DEFAULT_LIMIT") {
            self.pagination.default_limit = v.parse().unwrap_or(self.pagination.default_limit);
        }
        if let Ok(v) = env::var("PAGINATION_MAX_LIMIT") {
            self.pagination.max_limit = v.parse().unwrap_or(self.pagination.max_limit);
        }
        if let Ok(v) = env::var("PAGINATION_MAX_RELATIONS") {
            self.pagination.max_relations = v.parse().unwrap_or(self.pagination.max_relations);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_SCHEMA") {
            self.database.schema = v;
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_BOOTSTRAP") {
            self.database.bootstrap = v.parse().unwrap_or(self.database.bootstrap);
        }
        if let Ok(v) = env::var("DATABASE_SOFT_DELETE_COLUMN") {
            let v = v.trim().to_string();
            self.database.soft_delete_column = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = env::var("SCHEMA_CACHE_SECS") {
            self.database.schema_cache_secs = v.parse().unwrap_or(self.database.schema_cache_secs);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_SLOW_QUERY_WARNING") {
            self.database.enable_slow_query_warning = v.parse().unwrap_or(self.database.enable_slow_query_warning);
        }
        if let Ok(v) = env::var("DATABASE_SLOW_QUERY_THRESHOLD_MS") {
            self.database.slow_query_threshold_ms = v.parse().unwrap_or(self.database.slow_query_threshold_ms);
        }

        // API overrides
        if let Some(port) = env::var("API_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("SECURITY_JWT_SECRET").or_else(|_| env::var("JWT_SECRET")) {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_ISSUER") {
            self.security.jwt_issuer = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("PERMISSION_CACHE_SECS") {
            self.security.permission_cache_secs = v.parse().unwrap_or(self.security.permission_cache_secs);
        }

        // Auth overrides
        if let Ok(v) = env::var("AUTH_USER_TABLE") {
            self.auth.user_table = v;
        }
        if let Ok(v) = env::var("AUTH_ID_COLUMN") {
            self.auth.id_column = v;
        }
        if let Ok(v) = env::var("AUTH_USERNAME_COLUMN") {
            self.auth.username_column = v;
        }
        if let Ok(v) = env::var("AUTH_PASSWORD_COLUMN") {
            self.auth.password_column = v;
        }
        if let Ok(v) = env::var("AUTH_ROLE_COLUMN") {
            self.auth.role_column = v;
        }
        if let Ok(v) = env::var("AUTH_API_KEY_COLUMN") {
            let v = v.trim().to_string();
            self.auth.api_key_column = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = env::var("AUTH_API_KEY_HEADER") {
            self.auth.api_key_header = v.to_ascii_lowercase();
        }
        if let Ok(v) = env::var("AUTH_API_KEY_HASHED") {
            self.auth.api_key_hashed = v.parse().unwrap_or(self.auth.api_key_hashed);
        }
        if let Ok(v) = env::var("AUTH_DEFAULT_ROLE") {
            self.auth.default_role = v;
        }
        if let Ok(v) = env::var("AUTH_IDENTITY_COLUMN") {
            self.auth.identity_column = v;
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            pagination: PaginationConfig {
                default_limit: 20,
                max_limit: 1000,
                max_relations: 10,
            },
            database: DatabaseConfig {
                schema: "public".to_string(),
                max_connections: 10,
                connection_timeout: 30,
                bootstrap: true,
                soft_delete_column: None,
                schema_cache_secs: 5,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 100,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                jwt_secret: "tablegate-development-secret".to_string(),
                jwt_issuer: "tablegate".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                permission_cache_secs: 0,
            },
            auth: AuthConfig::defaults(),
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            pagination: PaginationConfig {
                default_limit: 20,
                max_limit: 500,
                max_relations: 5,
            },
            database: DatabaseConfig {
                schema: "public".to_string(),
                max_connections: 20,
                connection_timeout: 10,
                bootstrap: true,
                soft_delete_column: None,
                schema_cache_secs: 60,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 500,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_issuer: "tablegate".to_string(),
                jwt_expiry_hours: 24,
                permission_cache_secs: 30,
            },
            auth: AuthConfig::defaults(),
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            pagination: PaginationConfig {
                default_limit: 20,
                max_limit: 100,
                max_relations: 3,
            },
            database: DatabaseConfig {
                schema: "public".to_string(),
                max_connections: 50,
                connection_timeout: 5,
                bootstrap: false,
                soft_delete_column: None,
                schema_cache_secs: 300,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 1000,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: false,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_issuer: "tablegate".to_string(),
                jwt_expiry_hours: 4,
                permission_cache_secs: 60,
            },
            auth: AuthConfig::defaults(),
        }
    }

    /// Development preset without env overrides, for tests and embedding
    pub fn for_tests() -> Self {
        Self::development()
    }
}

impl AuthConfig {
    fn defaults() -> Self {
        Self {
            user_table: "users".to_string(),
            id_column: "id".to_string(),
            username_column: "email".to_string(),
            password_column: "password".to_string(),
            role_column: "role".to_string(),
            api_key_column: None,
            api_key_header: "x-api-key".to_string(),
            api_key_hashed: false,
            default_role: "USER".to_string(),
            identity_column: "user_id".to_string(),
        }
    }

    /// Columns of the user table that never leave the server
    pub fn secret_columns(&self) -> Vec<String> {
        let mut columns = vec![self.password_column.clone()];
        if let Some(key) = &self.api_key_column {
            columns.push(key.clone());
        }
        columns
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.pagination.max_limit, 1000);
        assert!(config.database.bootstrap);
        assert!(!config.security.jwt_secret.is_empty());
        assert_eq!(config.security.permission_cache_secs, 0);
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.pagination.max_limit, 100);
        assert!(!config.database.bootstrap);
        // Production must be given a secret explicitly
        assert!(config.security.jwt_secret.is_empty());
    }

    #[test]
    fn secret_columns_include_api_key_when_configured() {
        let mut auth = AuthConfig::defaults();
        assert_eq!(auth.secret_columns(), vec!["password".to_string()]);

        auth.api_key_column = Some("api_key".to_string());
        assert_eq!(auth.secret_columns(), vec!["password".to_string(), "api_key".to_string()]);
    }
}
