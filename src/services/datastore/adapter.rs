// Datastore abstraction: the description service, connection setup and execution
use async_trait::async_trait;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{DatastoreDescriptor, DatastoreKind, Identity, NativeStatement, QueryResult};

/// A live, reusable connection to one backend datastore.
/// Shared by every caller querying that datastore.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Execute a native statement, giving up after `timeout_secs`
    async fn exec(&self, statement: &NativeStatement, timeout_secs: u64) -> Result<QueryResult, AppError>;

    fn kind(&self) -> DatastoreKind;
}

/// Source of datastore metadata (the datastore-description service)
#[async_trait]
pub trait DatastoreDirectory: Send + Sync {
    async fn describe(&self, identity: &Identity, datastore_id: u64) -> Result<DatastoreDescriptor, AppError>;
}

/// Opens a connection from datastore metadata
#[async_trait]
pub trait DatastoreConnector: Send + Sync {
    async fn connect(&self, descriptor: &DatastoreDescriptor) -> Result<Arc<dyn Datastore>, AppError>;
}
