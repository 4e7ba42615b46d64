use crate::domain::attachment::UploadState;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub message_id: Uuid,
    pub upload_state: UploadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub progress_pct: u8,
}

impl From<crate::domain::attachment::Attachment> for AttachmentResponse {
    fn from(attachment: crate::domain::attachment::Attachment) -> Self {
        Self {
            id: attachment.id,
            message_id: attachment.message_id,
            upload_state: attachment.upload_state,
            url: attachment.url,
            progress_pct: attachment.progress_pct,
        }
    }
}
