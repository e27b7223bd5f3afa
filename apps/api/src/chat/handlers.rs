use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::chat::memory::Role;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageBody {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub message: ChatMessageBody,
    pub project_data: Option<Value>,
}

/// POST /chat
///
/// Turns are persisted only after the engine succeeds, so a failed
/// generation leaves nothing in the store.
pub async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let session_id = match req.session_id {
        Some(id) => id,
        None => {
            let id = state
                .store
                .create_session(&req.user_id)
                .await
                .map_err(AppError::Internal)?;
            state.engine.start_session(id).await;
            id
        }
    };

    let outcome = state.engine.process_message(session_id, &req.content).await?;

    state
        .store
        .append(session_id, Role::User, &req.content)
        .await
        .map_err(AppError::Internal)?;
    state
        .store
        .append(session_id, Role::Assistant, &outcome.response_text)
        .await
        .map_err(AppError::Internal)?;

    if outcome.is_final {
        if let Some(record) = &outcome.parsed_data {
            state
                .store
                .store_final_record(session_id, record)
                .await
                .map_err(AppError::Internal)?;
        }
    }

    let project_data = state
        .store
        .fetch_latest_final_record(session_id)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse {
        session_id,
        message: ChatMessageBody {
            role: Role::Assistant.as_str().to_string(),
            content: outcome.response_text,
        },
        project_data,
    }))
}
