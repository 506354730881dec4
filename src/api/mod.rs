pub mod pagination;

pub use pagination::{PageToken, PageWindow, Paginated};
