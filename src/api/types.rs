//! API request and response types

use crate::conversation::ConversationTurn;
use crate::orchestrator::FinalStage;
use serde::{Deserialize, Serialize};

/// Request to answer one customer message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Prior turns, oldest first, as returned by the previous response
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub conversation_id: String,
    pub history: Vec<ConversationTurn>,
    pub sources: Vec<String>,
    pub degraded: bool,
    pub stage: FinalStage,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
