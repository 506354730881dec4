pub mod data_service;
pub mod describe_service;

pub use data_service::DataService;
pub use describe_service::{DescribeService, TableDescription, TableSummary};
