pub mod record;
pub mod table;

pub use record::delete as record_delete;
pub use record::get as record_get;
pub use record::put as record_put;

pub use table::delete as table_delete;
pub use table::get as table_get;
pub use table::post as table_post;
pub use table::put as table_put;
