use async_trait::async_trait;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{DatastoreDescriptor, DatastoreKind};
use crate::services::datastore::adapter::{Datastore, DatastoreConnector};
use crate::services::datastore::{MySQLDatastore, PostgreSQLDatastore};

/// Opens pooled connections with the native driver for each datastore kind
pub struct NativeConnector {
    max_pool_size: usize,
}

impl NativeConnector {
    pub fn new(max_pool_size: usize) -> Self {
        Self { max_pool_size }
    }
}

impl Default for NativeConnector {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl DatastoreConnector for NativeConnector {
    async fn connect(&self, descriptor: &DatastoreDescriptor) -> Result<Arc<dyn Datastore>, AppError> {
        let handle: Arc<dyn Datastore> = match descriptor.kind {
            DatastoreKind::PostgreSQL => Arc::new(PostgreSQLDatastore::connect(descriptor, self.max_pool_size).await?),
            DatastoreKind::MySQL => Arc::new(MySQLDatastore::connect(descriptor).await?),
        };
        tracing::info!("Connected to {} datastore {} ({})", descriptor.kind.as_str(), descriptor.id, descriptor.name);
        Ok(handle)
    }
}
