use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Identity;

/// Header carrying the numeric id of the calling user
pub const USER_ID_HEADER: &str = "x-user-id";

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Couldn't find the table to be queried from")]
    NoTableSpecified,

    #[error("Queries spanning multiple tables ({0}) are not supported")]
    UnsupportedMultiTableQuery(usize),

    #[error("Query translation failed: {0}")]
    Translation(String),

    #[error("Datastore {datastore_id} unavailable: {reason}")]
    DatastoreUnavailable { datastore_id: u64, reason: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl AppError {
    /// Stable machine-readable code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NoTableSpecified => "NO_TABLE_SPECIFIED",
            AppError::UnsupportedMultiTableQuery(_) => "UNSUPPORTED_MULTI_TABLE_QUERY",
            AppError::Translation(_) => "TRANSLATION_ERROR",
            AppError::DatastoreUnavailable { .. } => "DATASTORE_UNAVAILABLE",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Execution(_) => "EXECUTION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::InvalidSql(_) => "INVALID_SQL",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NoTableSpecified
            | AppError::InvalidSql(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedMultiTableQuery(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Translation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DatastoreUnavailable { .. } | AppError::Connection(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Execution(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut error_detail = ErrorDetail::new(self.code(), self.to_string());

        // Point callers at the only supported execution mode
        if let AppError::UnsupportedMultiTableQuery(_) = self {
            error_detail = error_detail
                .with_details("Only single-table queries can be executed. Split the query per table.");
        }

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Caller identity taken from the request headers.
///
/// Sessions are validated upstream; this only lifts the already-authenticated
/// user id and bearer token off the request.
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing user id header".to_string()))?
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| AppError::Unauthorized("user id header must be numeric".to_string()))?;

        let access_token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Identity::new(user_id, access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_error_response_format() {
        let error = AppError::NotFound("Dashboard 7 not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_query_error_statuses() {
        assert_eq!(AppError::NoTableSpecified.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::UnsupportedMultiTableQuery(2).status(),
            StatusCode::NOT_IMPLEMENTED
        );
        let unavailable = AppError::DatastoreUnavailable {
            datastore_id: 4,
            reason: "refused".to_string(),
        };
        assert_eq!(unavailable.status(), StatusCode::BAD_GATEWAY);
        assert!(unavailable.to_string().contains("Datastore 4"));
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert!(detail.details.is_none());
    }

    #[test]
    fn test_rusqlite_error_maps_to_storage() {
        let err: AppError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn test_identity_from_headers() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "42")
            .header(AUTHORIZATION, "Bearer abc123")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let identity = Identity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.access_token.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_identity_requires_user_id() {
        let request = Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let err = Identity::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
