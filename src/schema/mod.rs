//! Table metadata: introspection, caching and input validation.

pub mod error;
pub mod introspect;
pub mod registry;
pub mod types;
pub mod validate;

pub use error::SchemaError;
pub use introspect::{PgIntrospector, SchemaIntrospector, StaticIntrospector};
pub use registry::SchemaRegistry;
pub use types::{ColumnSchema, ColumnType, Relation, RelationKind, TableSchema};
pub use validate::validate_input;
