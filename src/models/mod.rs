pub mod dashboard;
pub mod datastore;
pub mod query;

pub use dashboard::*;
pub use datastore::*;
pub use query::*;
