use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::attachments::AttachmentResponse;
use crate::error::Result;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Uploads attachment bytes for a message. The raw request body streams
/// straight through to the object store; aborting the request cancels the
/// upload and the attachment lands in `failed`.
///
/// # Errors
/// Returns `AppError::UploadFailed` if the transfer is cancelled or fails.
pub async fn upload_attachment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse> {
    let content_len =
        headers.get(header::CONTENT_LENGTH).and_then(|v| v.to_str().map_or(None, |s| s.parse::<usize>().ok()));

    // Bridge the Axum body into the neutral stream type the pipeline expects.
    let stream = body.into_data_stream().map(|res| res.map_err(|e| std::io::Error::other(e.to_string()))).boxed();

    // HTTP callers observe progress by polling; the watch consumer side is
    // left to in-process callers (and dropping it never stalls the pipe).
    let (progress_tx, _progress_rx) = tokio::sync::watch::channel(0u8);
    let cancel = CancellationToken::new();

    let attachment = state
        .attachment_service
        .upload(message_id, auth_user.user_id, content_len, stream, progress_tx, cancel)
        .await?;

    Ok((StatusCode::CREATED, Json(AttachmentResponse::from(attachment))))
}

/// Streams attachment bytes back to a conversation participant.
///
/// # Errors
/// Returns `AppError::NotFound` if the attachment does not exist or is not
/// complete.
///
/// # Panics
/// Panics if the default Content-Type cannot be parsed.
pub async fn download_attachment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let (content_length, stream) = state.attachment_service.download(id, auth_user.user_id).await?;

    let body = Body::from_stream(stream);
    let mut response = Response::new(body);

    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, "application/octet-stream".parse().expect("Valid Content-Type"));

    if content_length > 0
        && let Ok(val) = content_length.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_LENGTH, val);
    }

    Ok(response)
}
