// Client for the datastore-description service
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};

use crate::api::middleware::AppError;
use crate::models::{DatastoreDescriptor, Identity};
use crate::services::datastore::adapter::DatastoreDirectory;

/// Looks datastores up over HTTP at `{base_url}/api/v1/datastores/{id}`
pub struct HttpDatastoreDirectory {
    base_url: String,
    master_token: Option<String>,
    http_client: HttpClient,
}

impl HttpDatastoreDirectory {
    pub fn new(base_url: impl Into<String>, master_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            master_token,
            http_client: HttpClient::new(),
        }
    }

    pub fn datastore_url(&self, datastore_id: u64) -> String {
        format!("{}/api/v1/datastores/{}", self.base_url, datastore_id)
    }
}

#[async_trait]
impl DatastoreDirectory for HttpDatastoreDirectory {
    async fn describe(&self, identity: &Identity, datastore_id: u64) -> Result<DatastoreDescriptor, AppError> {
        let url = self.datastore_url(datastore_id);
        tracing::debug!("Fetching datastore {} for user {} from {}", datastore_id, identity.user_id, url);

        let mut request = self.http_client.get(&url);
        // Caller credentials first, the service's own credentials otherwise
        if let Some(token) = identity.access_token.as_ref().or(self.master_token.as_ref()) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("Datastore directory unreachable: {}", e)))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(AppError::NotFound(format!("Datastore {} not found", datastore_id)));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::Unauthorized(format!(
                    "Not allowed to read datastore {}",
                    datastore_id
                )));
            }
            status => {
                return Err(AppError::Connection(format!(
                    "Datastore directory returned {} for datastore {}",
                    status, datastore_id
                )));
            }
        }

        response
            .json::<DatastoreDescriptor>()
            .await
            .map_err(|e| AppError::Internal(format!("Malformed datastore description: {}", e)))
    }
}
