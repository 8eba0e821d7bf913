use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page grid width in grid units
pub const DEFAULT_PAGE_WIDTH: u32 = 100;
/// Default page grid height in grid units
pub const DEFAULT_PAGE_HEIGHT: u32 = 100;
/// Default side length of one grid cell
pub const DEFAULT_GRID_SIZE: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// User who created the dashboard
    pub user_id: i64,
    pub is_public: bool,
    /// Set when at least one widget on the dashboard is publicly accessible
    pub has_public_widgets: bool,
    pub show_navigation: bool,
    pub created_at: DateTime<Utc>,
}

/// A page of a dashboard. Pages are ordered by `number`, ascending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub id: i64,
    pub dashboard_id: i64,
    pub name: String,
    pub number: u32,
    /// Side length of each (square) grid cell
    pub grid_size: u32,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

impl Page {
    /// Page names follow `"<dashboard name> - <page number>"`
    pub fn page_name(dashboard_name: &str, number: u32) -> String {
        format!("{} - {}", dashboard_name, number)
    }
}

/// Grid dimensions applied to every freshly created page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDefaults {
    pub width: u32,
    pub height: u32,
    pub grid_size: u32,
}

impl Default for PageDefaults {
    fn default() -> Self {
        Self {
            width: DEFAULT_PAGE_WIDTH,
            height: DEFAULT_PAGE_HEIGHT,
            grid_size: DEFAULT_GRID_SIZE,
        }
    }
}

/// Page record that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewPage {
    pub dashboard_id: i64,
    pub name: String,
    pub number: u32,
    pub grid_size: u32,
    pub width: u32,
    pub height: u32,
}

impl NewPage {
    /// First page of a brand new dashboard
    pub fn first(dashboard_id: i64, dashboard_name: &str, defaults: &PageDefaults) -> Self {
        Self::numbered(dashboard_id, dashboard_name, 1, defaults)
    }

    /// The page that comes right after `last`
    pub fn following(dashboard: &Dashboard, last: &Page, defaults: &PageDefaults) -> Self {
        Self::numbered(dashboard.id, &dashboard.name, last.number + 1, defaults)
    }

    fn numbered(dashboard_id: i64, dashboard_name: &str, number: u32, defaults: &PageDefaults) -> Self {
        Self {
            dashboard_id,
            name: Page::page_name(dashboard_name, number),
            number,
            grid_size: defaults.grid_size,
            width: defaults.width,
            height: defaults.height,
        }
    }
}

/// A visualization unit. Its content lives outside the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Widget {
    pub id: i64,
    pub dashboard_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Placement of one widget on a page, in grid units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridItem {
    pub id: i64,
    pub page_id: i64,
    pub widget_id: i64,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGridItem {
    pub page_id: i64,
    pub widget_id: i64,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct NewDashboard {
    pub name: String,
    pub description: Option<String>,
    pub user_id: i64,
    pub is_public: bool,
    pub has_public_widgets: bool,
    pub show_navigation: bool,
}

/// Where a widget ended up after `add_widget`
#[derive(Debug, Clone, Serialize)]
pub struct WidgetPlacement {
    pub page: Page,
    pub item: GridItem,
    /// True when the widget spilled onto a page created for it
    pub created_page: bool,
}

/// A page together with its items and the occupancy derived from them
#[derive(Debug, Clone, Serialize)]
pub struct PageLayout {
    pub page: Page,
    pub items: Vec<GridItem>,
    pub grid: Vec<Vec<bool>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDashboardRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub has_public_widgets: bool,
    #[serde(default = "default_show_navigation")]
    pub show_navigation: bool,
}

fn default_show_navigation() -> bool {
    true
}

impl CreateDashboardRequest {
    pub fn into_new_dashboard(self, user_id: i64) -> NewDashboard {
        NewDashboard {
            name: self.name.trim().to_string(),
            description: self.description,
            user_id,
            is_public: self.is_public,
            has_public_widgets: self.has_public_widgets,
            show_navigation: self.show_navigation,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddWidgetRequest {
    pub width: u32,
    pub height: u32,
}
