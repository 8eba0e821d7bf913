use axum::{extract::State, Json};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{Identity, Query};

/// Run an interpreted query on the datastore that owns its table
pub async fn search(
    State(state): State<AppState>,
    identity: Identity,
    Json(query): Json<Query>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(
        "Search by user {} over {} table(s)",
        identity.user_id,
        query.tables.len()
    );

    let executed = state.dispatcher.execute(&identity, &query).await?;

    tracing::info!(
        "Search on {} returned {} rows in {}ms",
        executed.table,
        executed.result.row_count,
        executed.result.execution_time_ms
    );

    Ok(Json(serde_json::json!({
        "query": query,
        "executed": executed
    })))
}
