use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::messages::{
    DeleteMessageRequest, EditMessageRequest, ListMessagesParams, MessagePageResponse, ReactionRequest,
    ReportMessageRequest, SearchParams, SearchResponse, SendMessageRequest,
};
use crate::error::Result;
use crate::services::message_service::OutgoingMessage;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Appends a message to a conversation.
///
/// # Errors
/// Returns `AppError::NotAParticipant` if the sender is not in the
/// conversation.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let outgoing = OutgoingMessage {
        message_type: body.message_type,
        content: body.content,
        reply_to_message_id: body.reply_to_message_id,
        is_paid: body.is_paid,
        price_cents: body.price_cents,
        correlation_id: body.correlation_id,
    };

    let message = state.message_service.append(conversation_id, auth_user.user_id, outgoing).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Pages backward through a conversation's messages.
///
/// # Errors
/// Returns `AppError::BadRequest` for a malformed cursor.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<ListMessagesParams>,
) -> Result<impl IntoResponse> {
    let page = state
        .message_service
        .list(conversation_id, auth_user.user_id, params.cursor.as_deref(), params.limit)
        .await?;

    Ok(Json(MessagePageResponse { messages: page.messages, has_more: page.has_more, next_cursor: page.next_cursor }))
}

/// Edits a message the caller sent.
///
/// # Errors
/// Returns `AppError::Forbidden` for other users' messages and
/// `AppError::AlreadyDeleted` for tombstones.
pub async fn edit_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(body): Json<EditMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state.message_service.edit(message_id, auth_user.user_id, body.content, body.correlation_id).await?;
    Ok(Json(message))
}

/// Tombstones a message the caller sent.
///
/// # Errors
/// Returns `AppError::Forbidden` for other users' messages.
pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    body: Option<Json<DeleteMessageRequest>>,
) -> Result<impl IntoResponse> {
    let correlation_id = body.and_then(|Json(b)| b.correlation_id);
    state.message_service.delete(message_id, auth_user.user_id, correlation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Adds a reaction; duplicates are no-ops.
///
/// # Errors
/// Returns `AppError::NotAParticipant` for outsiders.
pub async fn add_reaction(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ReactionRequest>,
) -> Result<impl IntoResponse> {
    state.message_service.add_reaction(message_id, auth_user.user_id, body.kind, body.correlation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Removes a reaction; removing a non-existent one is a no-op.
///
/// # Errors
/// Returns `AppError::NotAParticipant` for outsiders.
pub async fn remove_reaction(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ReactionRequest>,
) -> Result<impl IntoResponse> {
    state.message_service.remove_reaction(message_id, auth_user.user_id, body.kind, body.correlation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reports a message for moderation.
///
/// # Errors
/// Returns `AppError::NotAParticipant` for outsiders.
pub async fn report_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ReportMessageRequest>,
) -> Result<impl IntoResponse> {
    state
        .message_service
        .report(message_id, auth_user.user_id, body.reason, body.description.as_deref())
        .await?;
    Ok(StatusCode::CREATED)
}

/// Searches message content across the caller's conversations.
///
/// # Errors
/// Returns `AppError::NotAParticipant` when filtering by a conversation the
/// caller is not in.
pub async fn search_messages(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse> {
    let messages = state.message_service.search(auth_user.user_id, &params.q, params.conversation_id).await?;
    Ok(Json(SearchResponse { messages }))
}
