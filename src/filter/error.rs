use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    /// Column exists but the caller may not read it
    #[error("Field '{0}' is not permitted")]
    FieldNotPermitted(String),

    #[error("Invalid WHERE clause: {0}")]
    InvalidWhereClause(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid offset: {0}")]
    InvalidOffset(String),

    #[error("Invalid page token")]
    InvalidPage,

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("At most {0} relations may be requested")]
    TooManyRelations(usize),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}
