use serde::{Deserialize, Serialize};

use crate::api::middleware::AppError;

/// The caller on whose behalf a datastore is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub access_token: Option<String>,
}

impl Identity {
    pub fn new(user_id: i64, access_token: Option<String>) -> Self {
        Self {
            user_id,
            access_token,
        }
    }
}

/// Backend engine behind a datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreKind {
    #[serde(alias = "postgres")]
    PostgreSQL,
    #[serde(alias = "mariadb")]
    MySQL,
}

impl DatastoreKind {
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatastoreKind::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatastoreKind::MySQL),
            _ => Err(AppError::Validation(format!("Unsupported datastore type: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatastoreKind::PostgreSQL => "postgresql",
            DatastoreKind::MySQL => "mysql",
        }
    }
}

/// Datastore metadata as returned by the datastore-description service.
/// Enough to open a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatastoreDescriptor {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DatastoreKind,
    pub connection_url: String,
}
