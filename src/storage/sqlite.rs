use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::middleware::AppError;
use crate::models::{
    Dashboard, GridItem, NewDashboard, NewGridItem, NewPage, Page, PageDefaults, Widget,
};
use crate::storage::DashboardRepository;

const PAGE_COLUMNS: &str = "id, dashboard_id, name, number, grid_size, width, height, created_at";
const GRID_ITEM_COLUMNS: &str = "id, page_id, widget_id, x, y, width, height";

/// SQLite storage for dashboards, pages, widgets and grid items
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute("PRAGMA foreign_keys = ON", [])?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS dashboards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                user_id INTEGER NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                has_public_widgets INTEGER NOT NULL DEFAULT 0,
                show_navigation INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS dashboard_pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dashboard_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                number INTEGER NOT NULL,
                grid_size INTEGER NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (dashboard_id) REFERENCES dashboards(id) ON DELETE CASCADE,
                UNIQUE(dashboard_id, number)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS widgets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dashboard_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (dashboard_id) REFERENCES dashboards(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS page_grid_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                page_id INTEGER NOT NULL,
                widget_id INTEGER NOT NULL,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                FOREIGN KEY (page_id) REFERENCES dashboard_pages(id) ON DELETE CASCADE,
                FOREIGN KEY (widget_id) REFERENCES widgets(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        // Last-page lookups walk this index backwards
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pages_dashboard_number ON dashboard_pages(dashboard_id, number DESC)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_grid_items_page ON page_grid_items(page_id)",
            [],
        )?;

        Ok(())
    }

    fn row_to_dashboard(row: &Row<'_>) -> SqliteResult<Dashboard> {
        Ok(Dashboard {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            user_id: row.get(3)?,
            is_public: row.get(4)?,
            has_public_widgets: row.get(5)?,
            show_navigation: row.get(6)?,
            created_at: parse_timestamp(row, 7)?,
        })
    }

    fn row_to_page(row: &Row<'_>) -> SqliteResult<Page> {
        Ok(Page {
            id: row.get(0)?,
            dashboard_id: row.get(1)?,
            name: row.get(2)?,
            number: row.get(3)?,
            grid_size: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
            created_at: parse_timestamp(row, 7)?,
        })
    }

    fn row_to_grid_item(row: &Row<'_>) -> SqliteResult<GridItem> {
        Ok(GridItem {
            id: row.get(0)?,
            page_id: row.get(1)?,
            widget_id: row.get(2)?,
            x: row.get(3)?,
            y: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
        })
    }

    fn insert_page(conn: &Connection, page: &NewPage) -> SqliteResult<Page> {
        let created_at = Utc::now();
        conn.execute(
            r#"
            INSERT INTO dashboard_pages (dashboard_id, name, number, grid_size, width, height, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                page.dashboard_id,
                page.name,
                page.number,
                page.grid_size,
                page.width,
                page.height,
                created_at.to_rfc3339(),
            ],
        )?;

        Ok(Page {
            id: conn.last_insert_rowid(),
            dashboard_id: page.dashboard_id,
            name: page.name.clone(),
            number: page.number,
            grid_size: page.grid_size,
            width: page.width,
            height: page.height,
            created_at,
        })
    }
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> SqliteResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

#[async_trait]
impl DashboardRepository for SqliteStorage {
    async fn create_dashboard(
        &self,
        dashboard: &NewDashboard,
        defaults: &PageDefaults,
    ) -> Result<(Dashboard, Page), AppError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let created_at = Utc::now();
        tx.execute(
            r#"
            INSERT INTO dashboards (name, description, user_id, is_public, has_public_widgets, show_navigation, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                dashboard.name,
                dashboard.description,
                dashboard.user_id,
                dashboard.is_public,
                dashboard.has_public_widgets,
                dashboard.show_navigation,
                created_at.to_rfc3339(),
            ],
        )?;

        let created = Dashboard {
            id: tx.last_insert_rowid(),
            name: dashboard.name.clone(),
            description: dashboard.description.clone(),
            user_id: dashboard.user_id,
            is_public: dashboard.is_public,
            has_public_widgets: dashboard.has_public_widgets,
            show_navigation: dashboard.show_navigation,
            created_at,
        };

        // A dashboard is never without a page to place widgets on
        let first_page = Self::insert_page(&tx, &NewPage::first(created.id, &created.name, defaults))?;
        tx.commit()?;

        Ok((created, first_page))
    }

    async fn get_dashboard(&self, id: i64) -> Result<Option<Dashboard>, AppError> {
        let conn = self.conn.lock().await;
        let dashboard = conn
            .query_row(
                "SELECT id, name, description, user_id, is_public, has_public_widgets, show_navigation, created_at FROM dashboards WHERE id = ?1",
                rusqlite::params![id],
                Self::row_to_dashboard,
            )
            .optional()?;
        Ok(dashboard)
    }

    async fn list_pages(&self, dashboard_id: i64) -> Result<Vec<Page>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dashboard_pages WHERE dashboard_id = ?1 ORDER BY number ASC",
            PAGE_COLUMNS
        ))?;
        let pages = stmt
            .query_map(rusqlite::params![dashboard_id], Self::row_to_page)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(pages)
    }

    async fn last_page(&self, dashboard_id: i64) -> Result<Option<Page>, AppError> {
        let conn = self.conn.lock().await;
        let page = conn
            .query_row(
                &format!(
                    "SELECT {} FROM dashboard_pages WHERE dashboard_id = ?1 ORDER BY number DESC LIMIT 1",
                    PAGE_COLUMNS
                ),
                rusqlite::params![dashboard_id],
                Self::row_to_page,
            )
            .optional()?;
        Ok(page)
    }

    async fn get_page(&self, page_id: i64) -> Result<Option<Page>, AppError> {
        let conn = self.conn.lock().await;
        let page = conn
            .query_row(
                &format!("SELECT {} FROM dashboard_pages WHERE id = ?1", PAGE_COLUMNS),
                rusqlite::params![page_id],
                Self::row_to_page,
            )
            .optional()?;
        Ok(page)
    }

    async fn create_page(&self, page: &NewPage) -> Result<Page, AppError> {
        let conn = self.conn.lock().await;
        Ok(Self::insert_page(&conn, page)?)
    }

    async fn create_widget(&self, dashboard_id: i64) -> Result<Widget, AppError> {
        let conn = self.conn.lock().await;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO widgets (dashboard_id, created_at) VALUES (?1, ?2)",
            rusqlite::params![dashboard_id, created_at.to_rfc3339()],
        )?;
        Ok(Widget {
            id: conn.last_insert_rowid(),
            dashboard_id,
            created_at,
        })
    }

    async fn list_widgets(&self, dashboard_id: i64) -> Result<Vec<Widget>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT id, dashboard_id, created_at FROM widgets WHERE dashboard_id = ?1 ORDER BY id ASC")?;
        let widgets = stmt
            .query_map(rusqlite::params![dashboard_id], |row| {
                Ok(Widget {
                    id: row.get(0)?,
                    dashboard_id: row.get(1)?,
                    created_at: parse_timestamp(row, 2)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(widgets)
    }

    async fn delete_widget(&self, widget_id: i64) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM widgets WHERE id = ?1", rusqlite::params![widget_id])?;
        Ok(())
    }

    async fn create_grid_item(&self, item: &NewGridItem) -> Result<GridItem, AppError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO page_grid_items (page_id, widget_id, x, y, width, height)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![item.page_id, item.widget_id, item.x, item.y, item.width, item.height],
        )?;
        Ok(GridItem {
            id: conn.last_insert_rowid(),
            page_id: item.page_id,
            widget_id: item.widget_id,
            x: item.x,
            y: item.y,
            width: item.width,
            height: item.height,
        })
    }

    async fn list_grid_items(&self, page_id: i64) -> Result<Vec<GridItem>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM page_grid_items WHERE page_id = ?1 ORDER BY id ASC",
            GRID_ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map(rusqlite::params![page_id], Self::row_to_grid_item)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(items)
    }
}
