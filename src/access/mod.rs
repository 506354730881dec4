//! Authorization decision engine: permission lattice, role/table/public
//! rules, own-record scoping and field restriction.

pub mod engine;
pub mod fields;
pub mod model;
pub mod permission;
pub mod store;

pub use engine::{AccessDenied, AccessEngine, AccessGrant, RecordScope, SYSTEM_TABLE_PREFIX};
pub use fields::FieldPolicy;
pub use model::{AuthMethod, Caller, Identity, PublicTableAccess, Role, TableRole, TableRules};
pub use permission::RolePermission;
pub use store::{CachedPermissionStore, MemoryPermissionStore, PermissionStore, PgPermissionStore};
