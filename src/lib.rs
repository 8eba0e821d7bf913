pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod storage;
pub mod validation;

pub use models::{
    Dashboard, DatastoreDescriptor, DatastoreKind, GridItem, Identity, NativeStatement, Page, PageDefaults,
    PageLayout, Query, QueryResult, TableRef, TranslatableQuery, Widget, WidgetPlacement,
};
pub use services::{
    CachePolicy, DatastoreCache, ExecutedQuery, GridLayoutEngine, OccupancyGrid, PageManager, PlacementPolicy,
    QueryDispatcher,
};
pub use validation::SqlValidator;
