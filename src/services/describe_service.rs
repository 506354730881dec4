use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::access::{AccessGrant, Caller, FieldPolicy, RolePermission};
use crate::error::ApiError;
use crate::schema::{ColumnSchema, ColumnType, RelationKind, TableSchema};
use crate::services::data_service::DataService;
use crate::state::AppState;
use crate::types::Operation;

/// JSON-Schema style view of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDescription {
    #[serde(rename = "type")]
    pub property_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub nullable: bool,
    #[serde(rename = "readOnly")]
    pub read_only: bool,
    /// Postgres type name as introspected
    pub db_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RelationKind,
    pub table: String,
    pub column: String,
    pub foreign_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub schema: String,
    pub primary_key: Option<String>,
    pub properties: BTreeMap<String, PropertyDescription>,
    pub required: Vec<String>,
    pub relations: Vec<RelationDescription>,
}

/// Table the caller may read, with how far the grant reaches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub access: RolePermission,
    pub own_records_only: bool,
}

impl TableDescription {
    /// Describe `table` as seen through `fields`
    pub fn build(table: &TableSchema, fields: &FieldPolicy) -> Self {
        let visible: Vec<&ColumnSchema> = table.columns.iter().filter(|c| fields.permits(&c.name)).collect();

        let properties = visible.iter().map(|c| (c.name.clone(), describe_column(c))).collect();
        let required = visible.iter().filter(|c| c.is_required()).map(|c| c.name.clone()).collect();
        let relations = table
            .relations
            .iter()
            .filter(|r| fields.permits(&r.column))
            .map(|r| RelationDescription {
                name: r.name.clone(),
                kind: r.kind,
                table: r.foreign_table.clone(),
                column: r.column.clone(),
                foreign_column: r.foreign_column.clone(),
            })
            .collect();

        Self {
            name: table.name.clone(),
            schema: table.schema.clone(),
            primary_key: table.primary_key.clone().filter(|pk| fields.permits(pk)),
            properties,
            required,
            relations,
        }
    }
}

fn describe_column(column: &ColumnSchema) -> PropertyDescription {
    let (property_type, format) = match column.column_type {
        ColumnType::Text => ("string", None),
        ColumnType::Integer => ("integer", None),
        ColumnType::Float | ColumnType::Numeric => ("number", None),
        ColumnType::Boolean => ("boolean", None),
        ColumnType::Uuid => ("string", Some("uuid")),
        ColumnType::Timestamp => ("string", Some("date-time")),
        ColumnType::Date => ("string", Some("date")),
        ColumnType::Time => ("string", Some("time")),
        ColumnType::Json => ("object", None),
        ColumnType::Array => ("array", None),
        ColumnType::Other => ("string", None),
    };

    PropertyDescription {
        property_type,
        format,
        max_length: column.max_length,
        default: column.default.clone(),
        nullable: column.nullable,
        read_only: !column.is_writable(),
        db_type: column.udt_name.clone(),
    }
}

pub struct DescribeService<'a> {
    state: &'a AppState,
    caller: &'a Caller,
}

impl<'a> DescribeService<'a> {
    pub fn new(state: &'a AppState, caller: &'a Caller) -> Self {
        Self { state, caller }
    }

    /// Tables the caller may read
    pub async fn list(&self) -> Result<Vec<TableSummary>, ApiError> {
        let mut readable = Vec::new();
        for table in self.state.schemas.list_tables().await? {
            let rules = self.state.permissions.rules_for(self.caller.role(), &table).await?;
            if let Ok(grant) = self.state.engine.decide(self.caller, &table, Operation::Read, &rules) {
                readable.push(summary(table, &grant));
            }
        }
        Ok(readable)
    }

    /// Schema of one table with the caller's unreadable fields removed
    pub async fn describe(&self, table: &str) -> Result<TableDescription, ApiError> {
        let (schema, grant) = DataService::new(self.state, self.caller)
            .authorize(table, Operation::Read)
            .await?;
        Ok(TableDescription::build(&schema, &grant.fields))
    }
}

fn summary(name: String, grant: &AccessGrant) -> TableSummary {
    TableSummary {
        name,
        access: grant.permission,
        own_records_only: grant.is_own_scope(),
    }
}

/// Serialized description for CLI output
pub fn to_json(description: &TableDescription) -> Value {
    serde_json::to_value(description).unwrap_or(Value::Null)
}
