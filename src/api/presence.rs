use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::presence::UpdatePresenceRequest;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

/// Explicit presence update from the client (visibility change, unload).
///
/// # Errors
/// Infallible beyond auth; the durable last-seen write is best-effort.
pub async fn update_presence(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<UpdatePresenceRequest>,
) -> Result<impl IntoResponse> {
    let presence =
        state.presence_service.set_status(auth_user.user_id, body.status, body.active_conversation_id).await;
    Ok(Json(presence))
}

/// Fetches a user's presence. A JSON `null` body means the user has never
/// been seen, which is distinct from a stored `offline` record.
///
/// # Errors
/// Returns `AppError::Database` if the last-seen lookup fails.
pub async fn get_presence(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let presence = state.presence_service.get_presence(user_id).await?;
    Ok(Json(presence))
}
