use serde_json::Value;

use crate::access::FieldPolicy;
use crate::config::AppConfig;
use crate::services::describe_service::to_json;
use crate::services::TableDescription;

/// Print unfiltered table descriptions as pretty JSON
pub async fn handle(config: &AppConfig, table: Option<String>) -> anyhow::Result<()> {
    let (_pool, schemas) = crate::cli::connect(config).await?;
    let unrestricted = FieldPolicy::unrestricted();

    let output = match table {
        Some(table) => {
            let schema = schemas.get(&table).await?;
            to_json(&TableDescription::build(&schema, &unrestricted))
        }
        None => {
            let mut tables = Vec::new();
            for name in schemas.list_tables().await? {
                let schema = schemas.get(&name).await?;
                tables.push(to_json(&TableDescription::build(&schema, &unrestricted)));
            }
            Value::Array(tables)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
