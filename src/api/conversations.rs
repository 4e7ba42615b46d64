use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::conversations::{
    ConversationListResponse, CreateDirectRequest, MarkReadRequest, UnreadTotalResponse,
};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Lists the caller's conversations, most recent activity first.
///
/// # Errors
/// Returns `AppError::StoreUnavailable` if the store stays unreachable.
pub async fn list_conversations(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let conversations = state.conversation_service.list(auth_user.user_id).await?;
    Ok(Json(ConversationListResponse { conversations }))
}

/// Idempotent get-or-create of the direct conversation with another user.
///
/// # Errors
/// Returns `AppError::ConflictRetryExhausted` if the creation race cannot be
/// resolved within bounded retries.
pub async fn get_or_create_direct(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateDirectRequest>,
) -> Result<impl IntoResponse> {
    let conversation = state.conversation_service.get_or_create_direct(auth_user.user_id, body.user_id).await?;
    Ok((StatusCode::OK, Json(conversation)))
}

/// Marks messages as read up to the given message.
///
/// # Errors
/// Returns `AppError::NotAParticipant` if the caller is not in the
/// conversation.
pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<MarkReadRequest>,
) -> Result<impl IntoResponse> {
    state.conversation_service.mark_read(conversation_id, auth_user.user_id, body.up_to_message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Total unread count across all the caller's conversations.
///
/// # Errors
/// Returns `AppError::StoreUnavailable` if the store stays unreachable.
pub async fn unread_total(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let total = state.conversation_service.unread_total(auth_user.user_id).await?;
    Ok(Json(UnreadTotalResponse { total }))
}
