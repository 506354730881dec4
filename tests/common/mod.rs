#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

use tablegate::access::{MemoryPermissionStore, PgPermissionStore, PublicTableAccess, Role, RolePermission, TableRole};
use tablegate::auth::{generate_jwt, Claims, MemoryUserStore, UserRecord};
use tablegate::config::AppConfig;
use tablegate::database::DatabaseManager;
use tablegate::schema::{
    ColumnSchema, ColumnType, PgIntrospector, Relation, RelationKind, SchemaRegistry, StaticIntrospector, TableSchema,
};
use tablegate::AppState;

pub const ALICE_PASSWORD: &str = "correct horse";
pub const ADMIN_KEY: &str = "key-admin";
pub const NO_ROLE_KEY: &str = "key-norole";

/// How a test request authenticates
pub enum As {
    Anonymous,
    Bearer(String),
    ApiKey(&'static str),
}

/// Router over in-memory stores and fixed schemas.
///
/// The pool is lazy and points nowhere, so only paths that fail before
/// touching the database can be exercised here.
pub struct TestApp {
    pub config: AppConfig,
    router: Router,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        let config = AppConfig::for_tests();
        let pool = DatabaseManager::connect_lazy(&config.database, "postgres://localhost/tablegate_unused")?;
        let schemas = SchemaRegistry::new(
            Arc::new(StaticIntrospector::new([posts(), users(), comments()])),
            Duration::from_secs(60),
        );
        let state = AppState::new(config.clone(), pool, schemas, Arc::new(permissions()), Arc::new(accounts()?));
        Ok(Self {
            config,
            router: tablegate::app(state),
        })
    }

    /// Router over a real database: schemas are introspected on every request
    /// and permissions come from the `_api_*` tables. Accounts stay in memory.
    pub fn live(config: AppConfig, pool: PgPool) -> Result<Self> {
        let schema = config.database.schema.clone();
        let schemas = SchemaRegistry::new(Arc::new(PgIntrospector::new(pool.clone(), schema.clone())), Duration::ZERO);
        let permissions = PgPermissionStore::new(pool.clone(), schema);
        let state = AppState::new(config.clone(), pool, schemas, Arc::new(permissions), Arc::new(accounts()?));
        Ok(Self {
            config,
            router: tablegate::app(state),
        })
    }

    pub fn token(&self, id: &str, role: &str) -> Result<String> {
        let claims = Claims::new(id, role, &self.config.security);
        Ok(generate_jwt(&claims, &self.config.security)?)
    }

    pub async fn get(&self, uri: &str, caller: As) -> Result<(StatusCode, Value)> {
        self.send(Method::GET, uri, caller, None).await
    }

    pub async fn post(&self, uri: &str, caller: As, body: Value) -> Result<(StatusCode, Value)> {
        self.send(Method::POST, uri, caller, Some(body.to_string())).await
    }

    pub async fn send(&self, method: Method, uri: &str, caller: As, body: Option<String>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        builder = match caller {
            As::Anonymous => builder,
            As::Bearer(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            As::ApiKey(key) => builder.header(self.config.auth.api_key_header.as_str(), key),
        };
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).with_context(|| format!("non-JSON body: {:?}", bytes))?
        };
        Ok((status, payload))
    }
}

fn column(name: &str, udt: &str, nullable: bool) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type: udt.to_string(),
        udt_name: udt.to_string(),
        column_type: ColumnType::from_udt(udt),
        nullable,
        default: None,
        identity_generation: None,
        is_generated: false,
        max_length: None,
        position: 0,
    }
}

fn serial(table: &str) -> ColumnSchema {
    let mut id = column("id", "int4", false);
    id.default = Some(format!("nextval('{}_id_seq'::regclass)", table));
    id
}

fn table(name: &str, columns: Vec<ColumnSchema>, relations: Vec<Relation>) -> TableSchema {
    TableSchema {
        schema: "public".to_string(),
        name: name.to_string(),
        primary_key: Some("id".to_string()),
        columns,
        relations,
    }
}

fn relation(name: &str, kind: RelationKind, column: &str, foreign_table: &str, foreign_column: &str) -> Relation {
    Relation {
        name: name.to_string(),
        kind,
        column: column.to_string(),
        foreign_table: foreign_table.to_string(),
        foreign_column: foreign_column.to_string(),
    }
}

pub fn posts() -> TableSchema {
    let mut title = column("title", "varchar", false);
    title.max_length = Some(20);
    table(
        "posts",
        vec![
            serial("posts"),
            title,
            column("body", "text", true),
            column("author_id", "int4", true),
            column("internal_notes", "text", true),
            column("created_at", "timestamptz", true),
        ],
        vec![
            relation("users", RelationKind::BelongsTo, "author_id", "users", "id"),
            relation("comments", RelationKind::HasMany, "id", "comments", "post_id"),
        ],
    )
}

pub fn users() -> TableSchema {
    table(
        "users",
        vec![
            serial("users"),
            column("email", "text", false),
            column("password", "text", true),
            column("role", "text", true),
        ],
        vec![relation("posts", RelationKind::HasMany, "id", "posts", "author_id")],
    )
}

pub fn comments() -> TableSchema {
    table(
        "comments",
        vec![
            serial("comments"),
            column("post_id", "int4", false),
            column("body", "text", true),
            column("user_id", "int4", true),
        ],
        vec![relation("posts", RelationKind::BelongsTo, "post_id", "posts", "id")],
    )
}

/// USER reads everything and manages its own posts; ADMIN does anything;
/// anonymous callers may read part of `comments`.
fn permissions() -> MemoryPermissionStore {
    MemoryPermissionStore::new()
        .with_role(Role {
            name: "USER".to_string(),
            records: RolePermission::Read,
        })
        .with_role(Role {
            name: "ADMIN".to_string(),
            records: RolePermission::Delete,
        })
        .with_table_role(TableRole {
            role: "USER".to_string(),
            table: "posts".to_string(),
            identity_column: Some("author_id".to_string()),
            records: RolePermission::Read,
            own_records: RolePermission::Delete,
            allowed_fields: vec![],
            restricted_fields: vec!["internal_notes".to_string()],
        })
        .with_public(PublicTableAccess {
            table: "comments".to_string(),
            access_level: RolePermission::Read,
            allowed_fields: vec!["id".to_string(), "post_id".to_string(), "body".to_string()],
        })
}

fn accounts() -> Result<MemoryUserStore> {
    let hash = bcrypt::hash(ALICE_PASSWORD, 4)?;
    Ok(MemoryUserStore::new()
        .with_user(
            "alice@example.com",
            UserRecord {
                id: "7".to_string(),
                role: Some("USER".to_string()),
                password_hash: Some(hash),
            },
        )
        .with_user(
            "nopass@example.com",
            UserRecord {
                id: "8".to_string(),
                role: None,
                password_hash: None,
            },
        )
        .with_api_key(
            ADMIN_KEY,
            UserRecord {
                id: "1".to_string(),
                role: Some("ADMIN".to_string()),
                password_hash: None,
            },
        )
        .with_api_key(
            NO_ROLE_KEY,
            UserRecord {
                id: "2".to_string(),
                role: None,
                password_hash: None,
            },
        ))
}

/// None when no database is configured for this run
pub fn database_url() -> Option<String> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => Some(url),
        _ => {
            eprintln!("DATABASE_URL not set; skipping database test");
            None
        }
    }
}

static SERVER: OnceLock<Result<TestServer, String>> = OnceLock::new();

/// The real binary, serving against `DATABASE_URL`
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        // Inherits DATABASE_URL and the rest of the environment
        let child = Command::new(env!("CARGO_BIN_EXE_tablegate"))
            .args(["serve", "--port", &port.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        let url = format!("{}/health", self.base_url);
        while Instant::now() < deadline {
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == reqwest::StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

/// None when no database is configured for this run
pub async fn ensure_server() -> Result<Option<&'static TestServer>> {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set; skipping live server test");
        return Ok(None);
    }
    let server = SERVER
        .get_or_init(|| TestServer::spawn().map_err(|e| format!("{:#}", e)))
        .as_ref()
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    server.wait_ready(Duration::from_secs(15)).await?;
    Ok(Some(server))
}
