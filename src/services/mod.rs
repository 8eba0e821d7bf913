pub mod datastore; // Backend handles, directory client and connector
pub mod datastore_cache;
pub mod grid_layout;
pub mod page_manager;
pub mod query_dispatcher;

pub use datastore_cache::*;
pub use grid_layout::*;
pub use page_manager::*;
pub use query_dispatcher::*;
