use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Authentication failed")]
    AuthError,
    #[error("Not a participant of this conversation")]
    NotAParticipant,
    #[error("Forbidden")]
    Forbidden,
    #[error("Message already deleted")]
    AlreadyDeleted,
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Conflicting writes exhausted retries")]
    ConflictRetryExhausted,
    #[error("Upload failed")]
    UploadFailed,
    #[error("Store unavailable")]
    StoreUnavailable,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::AuthError => {
                tracing::debug!("Authentication failed");
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Self::NotAParticipant => {
                tracing::debug!("Caller is not a participant");
                (StatusCode::FORBIDDEN, "Not a participant of this conversation".to_string())
            }
            Self::Forbidden => {
                tracing::debug!("Caller may not act on this resource");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }
            Self::AlreadyDeleted => {
                tracing::debug!("Target message is a tombstone");
                (StatusCode::CONFLICT, "Message already deleted".to_string())
            }
            Self::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            Self::Conflict(msg) => {
                tracing::debug!(message = %msg, "Conflict");
                (StatusCode::CONFLICT, msg)
            }
            Self::ConflictRetryExhausted => {
                tracing::warn!("Retries exhausted resolving a write conflict");
                (StatusCode::CONFLICT, "Conflicting writes exhausted retries".to_string())
            }
            Self::UploadFailed => {
                tracing::warn!("Attachment upload failed");
                (StatusCode::BAD_GATEWAY, "Upload failed".to_string())
            }
            Self::StoreUnavailable => {
                tracing::error!("Durable store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            Self::BadRequest(msg) => {
                tracing::debug!(message = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
