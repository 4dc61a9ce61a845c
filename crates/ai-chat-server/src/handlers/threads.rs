use crate::handlers::identity::UserId;
use crate::models::chat::{HistoryResponse, ThreadResponse, TurnView};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

pub async fn create_thread_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<(StatusCode, Json<ThreadResponse>), ApiError> {
    let thread_id = state.conversation_manager.create_thread(&user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ThreadResponse {
            message: "Thread created".to_string(),
            thread_id,
        }),
    ))
}

pub async fn history_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(thread_id): Path<String>,
) -> Json<HistoryResponse> {
    let history = state
        .conversation_manager
        .history(&user_id, &thread_id)
        .await;
    let public_path = &state.settings.uploads.public_path;

    Json(HistoryResponse {
        messages: history
            .into_turns()
            .into_iter()
            .map(|turn| TurnView::from_turn(turn, public_path))
            .collect(),
    })
}

pub async fn delete_thread_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(thread_id): Path<String>,
) -> Result<Json<ThreadResponse>, ApiError> {
    state
        .conversation_manager
        .delete_thread(&user_id, &thread_id)
        .await?;

    Ok(Json(ThreadResponse {
        message: "Thread deleted".to_string(),
        thread_id,
    }))
}
