pub mod commands;

use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::database::DatabaseManager;
use crate::schema::{PgIntrospector, SchemaRegistry};

#[derive(Parser)]
#[command(name = "tablegate")]
#[command(about = "REST API over PostgreSQL with role and row-level access control")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Listen port (overrides API_PORT)")]
        port: Option<u16>,
    },

    #[command(about = "Dump introspected table schemas as JSON")]
    Describe {
        #[arg(help = "Table name; every exposed table when omitted")]
        table: Option<String>,
    },

    #[command(about = "Mint a JWT for a user id and role")]
    Token {
        #[arg(long)]
        id: String,
        #[arg(long)]
        role: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = crate::config::config();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => commands::serve::handle(config, port).await,
        Commands::Describe { table } => commands::describe::handle(config, table).await,
        Commands::Token { id, role } => commands::token::handle(config, id, role, output_format),
    }
}

/// Connect and build a schema registry over the configured schema
pub(crate) async fn connect(config: &AppConfig) -> anyhow::Result<(PgPool, SchemaRegistry)> {
    let pool = DatabaseManager::connect(&config.database).await?;
    let introspector = Arc::new(PgIntrospector::new(pool.clone(), config.database.schema.clone()));
    let schemas = SchemaRegistry::new(introspector, Duration::from_secs(config.database.schema_cache_secs));
    Ok((pool, schemas))
}
