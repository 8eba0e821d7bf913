pub mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;

use crate::api::middleware::AppError;
use crate::models::{Dashboard, GridItem, NewDashboard, NewGridItem, NewPage, Page, PageDefaults, Widget};

/// Persistence for dashboards and their page grids
#[async_trait]
pub trait DashboardRepository: Send + Sync {
    /// Create a dashboard together with its first page
    async fn create_dashboard(
        &self,
        dashboard: &NewDashboard,
        defaults: &PageDefaults,
    ) -> Result<(Dashboard, Page), AppError>;

    async fn get_dashboard(&self, id: i64) -> Result<Option<Dashboard>, AppError>;

    /// Pages of a dashboard, ascending by page number
    async fn list_pages(&self, dashboard_id: i64) -> Result<Vec<Page>, AppError>;

    /// The page with the highest number, if the dashboard has any
    async fn last_page(&self, dashboard_id: i64) -> Result<Option<Page>, AppError>;

    async fn get_page(&self, page_id: i64) -> Result<Option<Page>, AppError>;

    async fn create_page(&self, page: &NewPage) -> Result<Page, AppError>;

    async fn create_widget(&self, dashboard_id: i64) -> Result<Widget, AppError>;

    /// Widgets of a dashboard in creation order
    async fn list_widgets(&self, dashboard_id: i64) -> Result<Vec<Widget>, AppError>;

    /// Remove a widget and any grid item placing it
    async fn delete_widget(&self, widget_id: i64) -> Result<(), AppError>;

    async fn create_grid_item(&self, item: &NewGridItem) -> Result<GridItem, AppError>;

    /// Grid items of a page in insertion order
    async fn list_grid_items(&self, page_id: i64) -> Result<Vec<GridItem>, AppError>;
}
