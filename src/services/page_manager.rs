use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::middleware::AppError;
use crate::models::{Dashboard, NewPage, PageDefaults, WidgetPlacement};
use crate::services::GridLayoutEngine;
use crate::storage::DashboardRepository;

/// Finds or creates the page a new widget lands on.
///
/// Placements on one dashboard run one at a time: reading the last page and
/// its items and then writing the page or grid item is not atomic in storage.
#[derive(Clone)]
pub struct PageManager {
    repository: Arc<dyn DashboardRepository>,
    layout: GridLayoutEngine,
    defaults: PageDefaults,
    dashboard_locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl PageManager {
    pub fn new(
        repository: Arc<dyn DashboardRepository>,
        layout: GridLayoutEngine,
        defaults: PageDefaults,
    ) -> Self {
        Self {
            repository,
            layout,
            defaults,
            dashboard_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn layout(&self) -> &GridLayoutEngine {
        &self.layout
    }

    pub fn defaults(&self) -> &PageDefaults {
        &self.defaults
    }

    /// Reject widget sizes that no page could ever hold
    pub fn check_widget_size(&self, width: u32, height: u32) -> Result<(), AppError> {
        if width == 0 || height == 0 {
            return Err(AppError::Validation(
                "Widget width and height must be at least 1".to_string(),
            ));
        }
        if !self.layout.fits_empty_page(&self.defaults, width, height) {
            return Err(AppError::Validation(format!(
                "Widget of {}x{} does not fit a {}x{} page",
                width, height, self.defaults.width, self.defaults.height
            )));
        }
        Ok(())
    }

    async fn dashboard_lock(&self, dashboard_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.dashboard_locks.lock().await;
        // Drop locks no placement holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(dashboard_id).or_default().clone()
    }

    /// Place a widget on the dashboard's last page, spilling onto a new page
    /// when the last one cannot take it.
    ///
    /// Page creation and grid item creation are separate writes. If the
    /// second one fails the new page is left empty, and the next call finds
    /// it as the last page and places there.
    pub async fn add_widget(
        &self,
        dashboard: &Dashboard,
        widget_id: i64,
        width: u32,
        height: u32,
    ) -> Result<WidgetPlacement, AppError> {
        self.check_widget_size(width, height)?;

        let lock = self.dashboard_lock(dashboard.id).await;
        let _guard = lock.lock().await;

        let last = self
            .repository
            .last_page(dashboard.id)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch last page of dashboard {}: {}", dashboard.id, e);
                e
            })?
            .ok_or_else(|| {
                tracing::error!("Dashboard {} has no pages", dashboard.id);
                AppError::NotFound(format!("Dashboard {} has no pages", dashboard.id))
            })?;

        if let Some(item) = self.layout.try_place(&last, widget_id, width, height).await? {
            return Ok(WidgetPlacement {
                page: last,
                item,
                created_page: false,
            });
        }

        let page = self
            .repository
            .create_page(&NewPage::following(dashboard, &last, &self.defaults))
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create page {} for dashboard {}: {}",
                    last.number + 1,
                    dashboard.id,
                    e
                );
                e
            })?;
        tracing::info!(
            "Created page {} ({}) on dashboard {} for widget {}",
            page.number,
            page.id,
            dashboard.id,
            widget_id
        );

        match self.layout.try_place(&page, widget_id, width, height).await? {
            Some(item) => Ok(WidgetPlacement {
                page,
                item,
                created_page: true,
            }),
            None => {
                tracing::error!(
                    "Fresh page {} of dashboard {} rejected widget {}",
                    page.id,
                    dashboard.id,
                    widget_id
                );
                Err(AppError::Internal(format!(
                    "Fresh page {} rejected widget {}",
                    page.id, widget_id
                )))
            }
        }
    }
}
