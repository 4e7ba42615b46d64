use crate::domain::attachment::{Attachment, UploadState};
use crate::error::{AppError, Result};
use crate::storage::DbPool;
use crate::storage::records::attachment::AttachmentRecord;
use async_trait::async_trait;
use uuid::Uuid;

/// Durable attachment rows; bytes themselves live in the object store.
#[async_trait]
pub trait AttachmentStore: Send + Sync + std::fmt::Debug {
    /// Claims the message's single attachment slot for an upload.
    ///
    /// A fresh message gets a new `pending` row with `candidate_id`. A prior
    /// `failed` or `pending` row is reset and reused (retries keep the same
    /// binding). An `uploading` or `complete` row yields `AppError::Conflict`
    /// so a message never ends up with two attachments.
    async fn bind_for_upload(&self, candidate_id: Uuid, message_id: Uuid) -> Result<Attachment>;

    async fn set_state(&self, id: Uuid, state: UploadState, url: Option<&str>, progress_pct: i16) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Attachment>>;

    async fn find_by_message(&self, message_id: Uuid) -> Result<Option<Attachment>>;
}

#[derive(Debug, Clone)]
pub struct PgAttachmentRepository {
    pool: DbPool,
}

impl PgAttachmentRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttachmentStore for PgAttachmentRepository {
    async fn bind_for_upload(&self, candidate_id: Uuid, message_id: Uuid) -> Result<Attachment> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT id, message_id, upload_state, url, progress_pct FROM attachments WHERE message_id = $1 FOR UPDATE",
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let record = match existing {
            Some(record) => {
                let state: UploadState = record.upload_state.parse().map_err(|_| AppError::Internal)?;
                match state {
                    UploadState::Uploading => {
                        return Err(AppError::Conflict("An upload is already in flight for this message".into()));
                    }
                    UploadState::Complete => {
                        return Err(AppError::Conflict("Message already has an attachment".into()));
                    }
                    UploadState::Pending | UploadState::Failed => {
                        sqlx::query_as::<_, AttachmentRecord>(
                            r"
                            UPDATE attachments
                            SET upload_state = 'pending', url = NULL, progress_pct = 0, updated_at = NOW()
                            WHERE id = $1
                            RETURNING id, message_id, upload_state, url, progress_pct
                            ",
                        )
                        .bind(record.id)
                        .fetch_one(&mut *tx)
                        .await?
                    }
                }
            }
            None => {
                sqlx::query_as::<_, AttachmentRecord>(
                    r"
                    INSERT INTO attachments (id, message_id, upload_state)
                    VALUES ($1, $2, 'pending')
                    RETURNING id, message_id, upload_state, url, progress_pct
                    ",
                )
                .bind(candidate_id)
                .bind(message_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        record.into_domain()
    }

    async fn set_state(&self, id: Uuid, state: UploadState, url: Option<&str>, progress_pct: i16) -> Result<()> {
        sqlx::query(
            r"
            UPDATE attachments
            SET upload_state = $2, url = $3, progress_pct = $4, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(state.as_str())
        .bind(url)
        .bind(progress_pct)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Attachment>> {
        let record = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT id, message_id, upload_state, url, progress_pct FROM attachments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(AttachmentRecord::into_domain).transpose()
    }

    async fn find_by_message(&self, message_id: Uuid) -> Result<Option<Attachment>> {
        let record = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT id, message_id, upload_state, url, progress_pct FROM attachments WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(AttachmentRecord::into_domain).transpose()
    }
}
