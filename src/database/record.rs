use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Errors from parsing or validating record input
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),

    #[error("Request body must contain at least one record")]
    Empty,

    #[error("Invalid record")]
    Invalid { field_errors: BTreeMap<String, String> },
}

impl RecordError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut field_errors = BTreeMap::new();
        field_errors.insert(field.into(), message.into());
        RecordError::Invalid { field_errors }
    }
}

/// A row-shaped JSON object, optionally paired with the stored row it updates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    original: Option<Map<String, Value>>,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create record from API input JSON
    pub fn from_json(json: Value) -> Result<Self, RecordError> {
        match json {
            Value::Object(fields) => Ok(Self { original: None, fields }),
            _ => Err(RecordError::InvalidJson("Expected JSON object".to_string())),
        }
    }

    /// Accept either a single object or an array of objects. The flag reports
    /// whether the input was an array so responses can mirror its shape.
    pub fn from_json_flexible(json: Value) -> Result<(Vec<Self>, bool), RecordError> {
        match json {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(RecordError::Empty);
                }
                let records = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        Self::from_json(item).map_err(|_| {
                            RecordError::InvalidJson(format!("Element {} is not a JSON object", index))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((records, true))
            }
            Value::Object(_) => Ok((vec![Self::from_json(json)?], false)),
            _ => Err(RecordError::InvalidJson("Expected JSON object or array".to_string())),
        }
    }

    /// Create record from a stored row
    pub fn from_row(row: Map<String, Value>) -> Self {
        Self { original: Some(row.clone()), fields: row }
    }

    /// Pair with the stored row this input updates
    pub fn inject(&mut self, original: Map<String, Value>) -> &mut Self {
        self.original = Some(original);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    pub fn original(&self) -> Option<&Map<String, Value>> {
        self.original.as_ref()
    }

    /// Check if a specific field differs from the stored row
    pub fn changed(&self, key: &str) -> bool {
        match (&self.original, self.fields.get(key)) {
            (Some(original), Some(current)) => original.get(key) != Some(current),
            (Some(original), None) => original.contains_key(key),
            (None, Some(_)) => true,
            (None, None) => false,
        }
    }

    /// Fields whose values differ from the stored row; every field on create
    pub fn changes(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(key, _)| self.changed(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { original: None, fields }
    }
}
