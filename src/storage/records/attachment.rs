use crate::domain::attachment::{Attachment, UploadState};
use crate::error::{AppError, Result};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AttachmentRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub upload_state: String,
    pub url: Option<String>,
    pub progress_pct: i16,
}

impl AttachmentRecord {
    pub(crate) fn into_domain(self) -> Result<Attachment> {
        let upload_state: UploadState = self.upload_state.parse().map_err(|e: String| {
            tracing::error!(error = %e, attachment_id = %self.id, "Corrupt attachment row");
            AppError::Internal
        })?;

        Ok(Attachment {
            id: self.id,
            message_id: self.message_id,
            upload_state,
            url: self.url,
            progress_pct: u8::try_from(self.progress_pct.clamp(0, 100)).unwrap_or(100),
        })
    }
}
