pub mod dynamic;
pub mod manager;
pub mod record;

pub use dynamic::DynamicRepository;
pub use manager::{DatabaseError, DatabaseManager};
pub use record::{Record, RecordError};
