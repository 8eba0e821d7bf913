// Page grid layout: occupancy grid and widget placement

use serde::Serialize;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{GridItem, NewGridItem, Page, PageDefaults, PageLayout};
use crate::storage::DashboardRepository;

/// Which cells of a page are taken, indexed `[y][x]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyGrid {
    width: u32,
    height: u32,
    cells: Vec<Vec<bool>>,
}

impl OccupancyGrid {
    /// Build the grid for a `width` x `height` page from its items.
    ///
    /// Items that do not lie completely inside the page are skipped rather
    /// than rejected. A zero width or height gives a grid with no rows.
    pub fn build(width: u32, height: u32, items: &[GridItem]) -> Self {
        if width == 0 || height == 0 {
            return Self {
                width,
                height,
                cells: Vec::new(),
            };
        }

        let mut cells = vec![vec![false; width as usize]; height as usize];
        for item in items {
            let in_bounds = item.x < width
                && item.y < height
                && item.x.checked_add(item.width).is_some_and(|right| right <= width)
                && item.y.checked_add(item.height).is_some_and(|bottom| bottom <= height);
            if !in_bounds {
                tracing::debug!(
                    "Skipping grid item {} at ({}, {}) outside {}x{} page",
                    item.id,
                    item.x,
                    item.y,
                    width,
                    height
                );
                continue;
            }

            for row in &mut cells[item.y as usize..(item.y + item.height) as usize] {
                for cell in &mut row[item.x as usize..(item.x + item.width) as usize] {
                    *cell = true;
                }
            }
        }

        Self { width, height, cells }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rows(&self) -> &[Vec<bool>] {
        &self.cells
    }

    pub fn into_rows(self) -> Vec<Vec<bool>> {
        self.cells
    }

    pub fn is_occupied(&self, x: u32, y: u32) -> bool {
        self.cells
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .copied()
            .unwrap_or(false)
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.iter().flatten().filter(|c| **c).count()
    }

    /// Whether a `width` x `height` rectangle at (x, y) is inside the page and free
    pub fn fits(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        let (Some(right), Some(bottom)) = (x.checked_add(width), y.checked_add(height)) else {
            return false;
        };
        if right > self.width || bottom > self.height || self.cells.is_empty() {
            return false;
        }

        self.cells[y as usize..bottom as usize]
            .iter()
            .all(|row| row[x as usize..right as usize].iter().all(|c| !*c))
    }

    /// First origin, scanning rows top to bottom and each row left to right,
    /// where the rectangle fits.
    pub fn first_fit(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        if width == 0 || height == 0 || width > self.width || height > self.height {
            return None;
        }
        (0..=self.height - height)
            .flat_map(|y| (0..=self.width - width).map(move |x| (x, y)))
            .find(|&(x, y)| self.fits(x, y, width, height))
    }
}

/// How the engine decides whether a page can take another widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// A page accepts a widget only while it holds no items; the widget goes to (0,0)
    #[default]
    SinglePerPage,
    /// First free origin on the occupancy grid
    FirstFit,
}

impl PlacementPolicy {
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single_per_page" | "single" => Ok(PlacementPolicy::SinglePerPage),
            "first_fit" => Ok(PlacementPolicy::FirstFit),
            _ => Err(AppError::Validation(format!("Unknown placement policy: {}", s))),
        }
    }
}

/// A widget rectangle anchored at (0,0) stays inside the page
fn within_extent(page_width: u32, page_height: u32, width: u32, height: u32) -> bool {
    width >= 1 && height >= 1 && width <= page_width && height <= page_height
}

/// Decides where a widget goes on a page and persists the grid item
#[derive(Clone)]
pub struct GridLayoutEngine {
    repository: Arc<dyn DashboardRepository>,
    policy: PlacementPolicy,
}

impl GridLayoutEngine {
    pub fn new(repository: Arc<dyn DashboardRepository>, policy: PlacementPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    /// Whether a widget of this size can ever land on a fresh page
    pub fn fits_empty_page(&self, defaults: &PageDefaults, width: u32, height: u32) -> bool {
        within_extent(defaults.width, defaults.height, width, height)
    }

    /// Try to place a widget on `page`.
    ///
    /// `Ok(None)` means the page cannot take the widget; that is not an error
    /// and callers must check it before treating the call as failed. `Err` is
    /// only returned when reading or persisting grid items fails.
    pub async fn try_place(
        &self,
        page: &Page,
        widget_id: i64,
        width: u32,
        height: u32,
    ) -> Result<Option<GridItem>, AppError> {
        let items = self.repository.list_grid_items(page.id).await.map_err(|e| {
            tracing::error!("Failed to load grid items of page {}: {}", page.id, e);
            e
        })?;

        let origin = match self.policy {
            _ if !within_extent(page.width, page.height, width, height) => None,
            PlacementPolicy::SinglePerPage => items.is_empty().then_some((0, 0)),
            PlacementPolicy::FirstFit => {
                OccupancyGrid::build(page.width, page.height, &items).first_fit(width, height)
            }
        };

        let Some((x, y)) = origin else {
            tracing::debug!(
                "Page {} cannot take widget {} ({}x{}), {} items present",
                page.id,
                widget_id,
                width,
                height,
                items.len()
            );
            return Ok(None);
        };

        let item = self
            .repository
            .create_grid_item(&NewGridItem {
                page_id: page.id,
                widget_id,
                x,
                y,
                width,
                height,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to persist grid item for widget {} on page {}: {}",
                    widget_id,
                    page.id,
                    e
                );
                e
            })?;

        tracing::info!(
            "Placed widget {} on page {} at ({}, {}) size {}x{}",
            widget_id,
            page.id,
            x,
            y,
            width,
            height
        );
        Ok(Some(item))
    }

    /// Page, its items and the occupancy computed from them
    pub async fn page_layout(&self, page_id: i64) -> Result<PageLayout, AppError> {
        let page = self
            .repository
            .get_page(page_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Page {} not found", page_id)))?;
        let items = self.repository.list_grid_items(page.id).await?;
        let grid = OccupancyGrid::build(page.width, page.height, &items).into_rows();

        Ok(PageLayout { page, items, grid })
    }
}
