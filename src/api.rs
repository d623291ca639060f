//! HTTP API for the support desk

mod handlers;
mod types;

pub use handlers::create_router;

use crate::orchestrator::QueryHandler;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<dyn QueryHandler>,
}

impl AppState {
    pub fn new(handler: Arc<dyn QueryHandler>) -> Self {
        Self { handler }
    }
}
