use thiserror::Error;

use crate::database::manager::DatabaseError;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
