//! HTTP request handlers

use super::types::{ChatRequest, ChatResponse, ErrorResponse, HealthResponse};
use super::AppState;
use crate::conversation::{ConversationId, ConversationState};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", post(chat))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::BadRequest("query must not be empty".to_string()));
    }

    let conversation_id = request
        .conversation_id
        .map(ConversationId::parse)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let prior = if request.history.is_empty() {
        None
    } else {
        let id = conversation_id.clone().unwrap_or_else(ConversationId::mint);
        let conversation = ConversationState::from_turns(id, request.history)
            .map_err(|e| AppError::BadRequest(format!("invalid history: {e}")))?;
        Some(conversation)
    };

    let result = state
        .handler
        .handle_query(query, conversation_id, prior)
        .await;

    Ok(Json(ChatResponse {
        reply: result.reply_text,
        conversation_id: result.conversation.id().to_string(),
        history: result.conversation.turns().to_vec(),
        sources: result.used_sources,
        degraded: result.degraded,
        stage: result.final_stage,
    }))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        tracing::debug!(%status, error = %message, "Rejected request");
        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
