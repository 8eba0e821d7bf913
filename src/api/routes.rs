use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{dashboard, query, AppState};
use crate::config::Config;
use crate::services::datastore::{DatastoreConnector, DatastoreDirectory, HttpDatastoreDirectory, NativeConnector};
use crate::services::{DatastoreCache, GridLayoutEngine, PageManager, QueryDispatcher};
use crate::storage::{DashboardRepository, SqliteStorage};

/// Create router backed by the datastore-description service and native drivers
pub fn create_router_with_state(storage: Arc<SqliteStorage>, config: Config) -> Router {
    let directory = Arc::new(HttpDatastoreDirectory::new(
        config.datastores.directory_url.clone(),
        config.datastores.access_token.clone(),
    ));
    let connector = Arc::new(NativeConnector::new(config.datastores.max_pool_size));

    router(build_state(storage, config, directory, connector))
}

/// Wire the services together on top of the given storage and datastore seams
pub fn build_state(
    storage: Arc<dyn DashboardRepository>,
    config: Config,
    directory: Arc<dyn DatastoreDirectory>,
    connector: Arc<dyn DatastoreConnector>,
) -> AppState {
    let cache = Arc::new(DatastoreCache::with_policy(directory, connector, config.cache.policy()));
    let dispatcher = Arc::new(QueryDispatcher::new(
        cache,
        config.datastores.query_timeout_secs,
        config.datastores.max_rows,
    ));

    let layout = GridLayoutEngine::new(storage.clone(), config.layout.policy);
    let page_manager = Arc::new(PageManager::new(
        storage.clone(),
        layout,
        config.layout.page_defaults(),
    ));

    tracing::info!(
        "Placement policy {:?}, pages {}x{} (grid {})",
        config.layout.policy,
        config.layout.page_width,
        config.layout.page_height,
        config.layout.grid_size
    );

    AppState {
        storage,
        page_manager,
        dispatcher,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/search", post(query::search))
        .route("/api/v1/dashboards", post(dashboard::create_dashboard))
        .route("/api/v1/dashboards/{id}", get(dashboard::get_dashboard))
        .route("/api/v1/dashboards/{id}/widgets", post(dashboard::add_widget))
        .route("/api/v1/pages/{id}/layout", get(dashboard::get_page_layout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::datastore_cache::tests::{FakeConnector, FakeDirectory};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        directory: Arc<FakeDirectory>,
        _dir: TempDir,
    }

    async fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SqliteStorage::new(dir.path().join("test.db")).await.unwrap());
        let config = Config::from_env().unwrap();
        let directory = Arc::new(FakeDirectory::default());
        let state = build_state(storage, config, directory.clone(), Arc::new(FakeConnector::default()));
        TestApp {
            app: router(state),
            directory,
            _dir: dir,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", "7")
            .header("authorization", "Bearer caller-token");
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let test = test_app().await;
        let response = test
            .app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_widgets_spill_onto_new_pages() {
        let test = test_app().await;

        let (status, created) = send(&test.app, "POST", "/api/v1/dashboards", Some(json!({"name": "Sales"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["pages"][0]["name"], "Sales - 1");
        assert_eq!(created["dashboard"]["user_id"], 7);
        let id = created["dashboard"]["id"].as_i64().unwrap();

        let uri = format!("/api/v1/dashboards/{}/widgets", id);
        let (status, first) = send(&test.app, "POST", &uri, Some(json!({"width": 4, "height": 3}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["placement"]["page"]["number"], 1);
        assert_eq!(first["placement"]["created_page"], false);

        let (status, second) = send(&test.app, "POST", &uri, Some(json!({"width": 4, "height": 3}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["placement"]["page"]["number"], 2);
        assert_eq!(second["placement"]["page"]["name"], "Sales - 2");
        assert_eq!(second["placement"]["item"]["x"], 0);
        assert_eq!(second["placement"]["item"]["y"], 0);

        let (status, fetched) = send(&test.app, "GET", &format!("/api/v1/dashboards/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["pages"].as_array().unwrap().len(), 2);

        let page_id = second["placement"]["page"]["id"].as_i64().unwrap();
        let (status, layout) = send(&test.app, "GET", &format!("/api/v1/pages/{}/layout", page_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(layout["items"].as_array().unwrap().len(), 1);
        assert_eq!(layout["grid"][0][0], true);
        assert_eq!(layout["grid"][3][4], false);
    }

    #[tokio::test]
    async fn test_dashboard_errors() {
        let test = test_app().await;

        let (status, body) = send(&test.app, "POST", "/api/v1/dashboards", Some(json!({"name": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = send(&test.app, "GET", "/api/v1/dashboards/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &test.app,
            "POST",
            "/api/v1/dashboards/999/widgets",
            Some(json!({"width": 1, "height": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&test.app, "GET", "/api/v1/pages/999/layout", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejected_widget_leaves_no_record() {
        let test = test_app().await;
        let (_, created) = send(&test.app, "POST", "/api/v1/dashboards", Some(json!({"name": "Ops"}))).await;
        let id = created["dashboard"]["id"].as_i64().unwrap();
        let uri = format!("/api/v1/dashboards/{}/widgets", id);

        let (status, body) = send(&test.app, "POST", &uri, Some(json!({"width": 150, "height": 10}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = send(&test.app, "POST", &uri, Some(json!({"width": 0, "height": 10}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, fetched) = send(&test.app, "GET", &format!("/api/v1/dashboards/{}", id), None).await;
        assert!(fetched["widgets"].as_array().unwrap().is_empty());
        assert_eq!(fetched["pages"].as_array().unwrap().len(), 1);

        let page_id = fetched["pages"][0]["id"].as_i64().unwrap();
        let (_, layout) = send(&test.app, "GET", &format!("/api/v1/pages/{}/layout", page_id), None).await;
        assert!(layout["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let test = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/dashboards")
            .header("content-type", "application/json")
            .body(Body::from(json!({"name": "Ops"}).to_string()))
            .unwrap();
        let response = test.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_search_single_table() {
        let test = test_app().await;
        let query = json!({
            "tables": {"orders": {"name": "orders", "datastore_id": 5}},
            "select": [{"column": "id"}]
        });

        let (status, body) = send(&test.app, "POST", "/api/v1/search", Some(query)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["executed"]["datastore_id"], 5);
        assert_eq!(body["executed"]["result"]["rows"][0]["datastore"], 5);
        assert_eq!(test.directory.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_rejects_multi_table() {
        let test = test_app().await;
        let query = json!({
            "tables": {
                "orders": {"name": "orders", "datastore_id": 5},
                "customers": {"name": "customers", "datastore_id": 6}
            },
            "select": [{"column": "id"}]
        });

        let (status, body) = send(&test.app, "POST", "/api/v1/search", Some(query)).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert!(body["error"]["details"].is_string());
        assert_eq!(test.directory.fetches.load(Ordering::SeqCst), 0);
    }
}
