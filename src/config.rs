use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::PageDefaults;
use crate::services::{CachePolicy, PlacementPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub datastores: DatastoresConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub layout: LayoutConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatastoresConfig {
    /// Base URL of the datastore-description service
    pub directory_url: String,
    /// Credential used when the caller has none of its own
    pub access_token: Option<String>,
    pub query_timeout_secs: u64,
    pub max_rows: u64,
    pub max_pool_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    pub max_entries: Option<usize>,
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            max_entries: self.max_entries,
            ttl: self.ttl_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutConfig {
    pub policy: PlacementPolicy,
    pub page_width: u32,
    pub page_height: u32,
    pub grid_size: u32,
}

impl LayoutConfig {
    pub fn page_defaults(&self) -> PageDefaults {
        PageDefaults {
            width: self.page_width,
            height: self.page_height,
            grid_size: self.grid_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./dashboards.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8087)?
            .set_default("datastores.directory_url", "http://127.0.0.1:8085")?
            .set_default("datastores.query_timeout_secs", 30)?
            .set_default("datastores.max_rows", 1000)?
            .set_default("datastores.max_pool_size", 16)?
            .set_default("layout.policy", "single_per_page")?
            .set_default("layout.page_width", 100)?
            .set_default("layout.page_height", 100)?
            .set_default("layout.grid_size", 10)?
            .set_default("logging.level", "info")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(8087))?;
        }

        if let Ok(url) = env::var("DATASTORE_DIRECTORY_URL") {
            builder = builder.set_override("datastores.directory_url", url)?;
        }

        if let Ok(token) = env::var("DATASTORE_ACCESS_TOKEN") {
            builder = builder.set_override("datastores.access_token", Some(token))?;
        }

        if let Ok(timeout) = env::var("QUERY_TIMEOUT_SECS") {
            builder = builder.set_override("datastores.query_timeout_secs", timeout)?;
        }

        if let Ok(max_rows) = env::var("QUERY_MAX_ROWS") {
            builder = builder.set_override("datastores.max_rows", max_rows)?;
        }

        if let Ok(max_entries) = env::var("DATASTORE_CACHE_MAX_ENTRIES") {
            builder = builder.set_override("cache.max_entries", Some(max_entries))?;
        }

        if let Ok(ttl) = env::var("DATASTORE_CACHE_TTL_SECS") {
            builder = builder.set_override("cache.ttl_secs", Some(ttl))?;
        }

        if let Ok(policy) = env::var("LAYOUT_POLICY") {
            builder = builder.set_override("layout.policy", policy)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
