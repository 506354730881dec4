use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::manager::DatabaseManager;

/// Coarse classification of a Postgres column type, used for input
/// validation and parameter encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Numeric,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    Time,
    Json,
    Array,
    Other,
}

impl ColumnType {
    /// Classify from `information_schema.columns.udt_name`
    pub fn from_udt(udt_name: &str) -> Self {
        if udt_name.starts_with('_') {
            return ColumnType::Array;
        }
        match udt_name {
            "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => ColumnType::Text,
            "int2" | "int4" | "int8" => ColumnType::Integer,
            "float4" | "float8" => ColumnType::Float,
            "numeric" | "money" => ColumnType::Numeric,
            "bool" => ColumnType::Boolean,
            "uuid" => ColumnType::Uuid,
            "timestamp" | "timestamptz" => ColumnType::Timestamp,
            "date" => ColumnType::Date,
            "time" | "timetz" => ColumnType::Time,
            "json" | "jsonb" => ColumnType::Json,
            _ => ColumnType::Other,
        }
    }
}

/// One column of an introspected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub udt_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<String>,
    /// `ALWAYS` / `BY DEFAULT` for identity columns
    pub identity_generation: Option<String>,
    pub is_generated: bool,
    pub max_length: Option<i32>,
    pub position: i32,
}

impl ColumnSchema {
    /// Postgres type name usable in a `$n::type` cast
    pub fn cast_type(&self) -> String {
        match self.udt_name.strip_prefix('_') {
            Some(element) => format!("{}[]", quote_type(element)),
            None => quote_type(&self.udt_name),
        }
    }

    /// Must be supplied on insert
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && self.identity_generation.is_none() && !self.is_generated
    }

    /// May be supplied by API input at all
    pub fn is_writable(&self) -> bool {
        !self.is_generated && self.identity_generation.as_deref() != Some("ALWAYS")
    }

    /// Encode a JSON value as the text form Postgres accepts for this column.
    /// `None` binds SQL NULL.
    pub fn encode(&self, value: &Value) -> Option<String> {
        match (value, self.column_type) {
            (Value::Null, _) => None,
            (Value::String(s), ColumnType::Json) => Some(Value::String(s.clone()).to_string()),
            (Value::String(s), _) => Some(s.clone()),
            (Value::Array(items), ColumnType::Array) => Some(pg_array_literal(items)),
            (Value::Array(_), _) | (Value::Object(_), _) => Some(value.to_string()),
            (Value::Number(n), _) => Some(n.to_string()),
            (Value::Bool(b), _) => Some(b.to_string()),
        }
    }
}

fn quote_type(name: &str) -> String {
    // Built-in type names are plain identifiers; user-defined ones (enums) get quoted
    if name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        name.to_string()
    } else {
        DatabaseManager::quote_identifier(name)
    }
}

/// `{a,"b c",NULL}` literal for a JSON array
fn pg_array_literal(items: &[Value]) -> String {
    let parts: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Array(inner) => pg_array_literal(inner),
            Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            other => {
                let text = other.to_string();
                format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect();
    format!("{{{}}}", parts.join(","))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// This table holds the foreign key: one related row
    BelongsTo,
    /// The related table holds the foreign key: many related rows
    HasMany,
}

/// Foreign-key link usable for relation traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    /// Join column on this table
    pub column: String,
    pub foreign_table: String,
    /// Join column on the related table
    pub foreign_column: String,
}

/// Introspected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    pub primary_key: Option<String>,
    pub columns: Vec<ColumnSchema>,
    pub relations: Vec<Relation>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn primary_key_column(&self) -> Option<&ColumnSchema> {
        self.primary_key.as_deref().and_then(|pk| self.column(pk))
    }

    /// `"schema"."table"`
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            DatabaseManager::quote_identifier(&self.schema),
            DatabaseManager::quote_identifier(&self.name)
        )
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_udt_names() {
        assert_eq!(ColumnType::from_udt("int8"), ColumnType::Integer);
        assert_eq!(ColumnType::from_udt("timestamptz"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_udt("_int4"), ColumnType::Array);
        assert_eq!(ColumnType::from_udt("mood"), ColumnType::Other);
    }

    #[test]
    fn cast_type_handles_arrays_and_enums() {
        assert_eq!(column("tags", "_text", true).cast_type(), "text[]");
        assert_eq!(column("n", "int4", true).cast_type(), "int4");
        assert_eq!(column("m", "Mood", true).cast_type(), "\"Mood\"");
    }

    #[test]
    fn encodes_values_for_binding() {
        let tags = column("tags", "_text", true);
        assert_eq!(tags.encode(&json!(["a", "b \"c\""])).unwrap(), r#"{"a","b \"c\""}"#);
        assert_eq!(tags.encode(&json!(null)), None);

        let data = column("data", "jsonb", true);
        assert_eq!(data.encode(&json!({"k": 1})).unwrap(), r#"{"k":1}"#);
        assert_eq!(data.encode(&json!("plain")).unwrap(), r#""plain""#);

        let n = column("n", "int4", true);
        assert_eq!(n.encode(&json!(42)).unwrap(), "42");
        assert_eq!(column("b", "bool", true).encode(&json!(true)).unwrap(), "true");
    }

    #[test]
    fn required_and_writable_flags() {
        let table = posts();
        assert!(!table.column("id").unwrap().is_required());
        assert!(table.column("title").unwrap().is_required());
        assert!(!table.column("body").unwrap().is_required());

        let mut generated = column("slug", "text", false);
        generated.is_generated = true;
        assert!(!generated.is_writable());
        assert!(!generated.is_required());

        let mut identity = column("id", "int8", false);
        identity.identity_generation = Some("ALWAYS".to_string());
        assert!(!identity.is_writable());
    }

    #[test]
    fn qualified_name_is_quoted() {
        assert_eq!(posts().qualified_name(), "\"public\".\"posts\"");
    }
}
