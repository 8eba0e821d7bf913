use serde::Serialize;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{Identity, NativeStatement, QueryResult, TranslatableQuery};
use crate::services::DatastoreCache;
use crate::validation::SqlValidator;

/// Outcome of a dispatched query
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedQuery {
    pub datastore_id: u64,
    pub table: String,
    pub statement: NativeStatement,
    /// True when a row cap was appended to the statement
    pub limit_applied: bool,
    pub result: QueryResult,
}

/// Runs single-table queries against the datastore that owns the table
pub struct QueryDispatcher {
    cache: Arc<DatastoreCache>,
    timeout_secs: u64,
    max_rows: u64,
}

impl QueryDispatcher {
    pub fn new(cache: Arc<DatastoreCache>, timeout_secs: u64, max_rows: u64) -> Self {
        Self {
            cache,
            timeout_secs,
            max_rows,
        }
    }

    pub fn cache(&self) -> &Arc<DatastoreCache> {
        &self.cache
    }

    pub async fn execute<Q>(&self, identity: &Identity, query: &Q) -> Result<ExecutedQuery, AppError>
    where
        Q: TranslatableQuery + ?Sized,
    {
        let table = match query.tables().as_slice() {
            [] => return Err(AppError::NoTableSpecified),
            [table] => (*table).clone(),
            tables => {
                tracing::warn!("Rejecting query over {} tables", tables.len());
                return Err(AppError::UnsupportedMultiTableQuery(tables.len()));
            }
        };

        let native = query.to_native().map_err(|e| {
            tracing::error!("Failed to translate query on table {}: {}", table.name, e);
            match e {
                AppError::Translation(_) => e,
                other => AppError::Translation(other.to_string()),
            }
        })?;

        let (prepared, limit_applied) = SqlValidator::ensure_limit(&native.query, self.max_rows)?;
        let statement = NativeStatement {
            query: prepared,
            args: native.args,
        };

        let datastore = self.cache.resolve(identity, table.datastore_id).await.map_err(|e| {
            tracing::error!(
                "Failed to resolve datastore {} for table {}: {}",
                table.datastore_id,
                table.name,
                e
            );
            e
        })?;

        tracing::info!(
            "Executing query on table {} in datastore {} ({})",
            table.name,
            table.datastore_id,
            datastore.kind().as_str()
        );
        let result = datastore.exec(&statement, self.timeout_secs).await.map_err(|e| {
            tracing::error!("Query on datastore {} failed: {}", table.datastore_id, e);
            match e {
                AppError::Execution(_) => e,
                other => AppError::Execution(other.to_string()),
            }
        })?;

        Ok(ExecutedQuery {
            datastore_id: table.datastore_id,
            table: table.name,
            statement,
            limit_applied,
            result,
        })
    }
}
