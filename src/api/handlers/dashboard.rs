use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{AddWidgetRequest, CreateDashboardRequest, Dashboard, Identity};

async fn load_dashboard(state: &AppState, id: i64) -> Result<Dashboard, AppError> {
    state
        .storage
        .get_dashboard(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Dashboard {} not found", id)))
}

/// Create a dashboard with its first page
pub async fn create_dashboard(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<CreateDashboardRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("Dashboard name cannot be empty".to_string()));
    }

    let new_dashboard = payload.into_new_dashboard(identity.user_id);
    let (dashboard, page) = state
        .storage
        .create_dashboard(&new_dashboard, state.page_manager.defaults())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create dashboard {}: {}", new_dashboard.name, e);
            e
        })?;

    tracing::info!("Created dashboard {} ({}) for user {}", dashboard.id, dashboard.name, identity.user_id);

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "dashboard": dashboard,
            "pages": [page]
        })),
    ))
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let dashboard = load_dashboard(&state, id).await?;
    let pages = state.storage.list_pages(id).await?;
    let widgets = state.storage.list_widgets(id).await?;

    Ok(Json(serde_json::json!({
        "dashboard": dashboard,
        "pages": pages,
        "widgets": widgets
    })))
}

/// Add a widget and place it on the last page, creating a page if needed
pub async fn add_widget(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<AddWidgetRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.page_manager.check_widget_size(payload.width, payload.height)?;

    let dashboard = load_dashboard(&state, id).await?;
    let widget = state.storage.create_widget(dashboard.id).await?;

    let placement = match state
        .page_manager
        .add_widget(&dashboard, widget.id, payload.width, payload.height)
        .await
    {
        Ok(placement) => placement,
        Err(e) => {
            tracing::error!("Placing widget {} on dashboard {} failed: {}", widget.id, dashboard.id, e);
            if let Err(cleanup) = state.storage.delete_widget(widget.id).await {
                tracing::error!("Failed to remove unplaced widget {}: {}", widget.id, cleanup);
            }
            return Err(e);
        }
    };

    tracing::info!(
        "Placed widget {} on page {} of dashboard {} at ({}, {})",
        widget.id,
        placement.page.number,
        dashboard.id,
        placement.item.x,
        placement.item.y
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "widget": widget,
            "placement": placement
        })),
    ))
}

pub async fn get_page_layout(
    State(state): State<AppState>,
    Path(page_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let layout = state.page_manager.layout().page_layout(page_id).await?;
    Ok(Json(serde_json::json!(layout)))
}
