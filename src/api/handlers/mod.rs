pub mod dashboard;
pub mod query;

use std::sync::Arc;

use crate::services::{PageManager, QueryDispatcher};
use crate::storage::DashboardRepository;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn DashboardRepository>,
    pub page_manager: Arc<PageManager>,
    pub dispatcher: Arc<QueryDispatcher>,
}
