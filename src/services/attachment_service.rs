use crate::config::StorageConfig;
use crate::domain::attachment::{Attachment, UploadState};
use crate::error::{AppError, Result};
use crate::storage::{AttachmentStore, ConversationStore, MessageStore, ObjectStore, ObjectStream};
use bytes::Bytes;
use futures::StreamExt;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    uploads_total: Counter<u64>,
    uploaded_bytes: Counter<u64>,
    upload_size_bytes: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confab-server");
        Self {
            uploads_total: meter
                .u64_counter("attachments_uploads_total")
                .with_description("Attachment upload outcomes")
                .build(),
            uploaded_bytes: meter
                .u64_counter("attachments_uploaded_bytes")
                .with_description("Total bytes of attachments uploaded")
                .build(),
            upload_size_bytes: meter
                .u64_histogram("attachments_upload_size_bytes")
                .with_description("Distribution of attachment upload sizes")
                .build(),
        }
    }
}

/// Chunked attachment uploads bound to a message.
///
/// Drives `pending -> uploading -> complete | failed`. Progress is reported
/// through a `watch` channel (latest-wins), so a slow or absent consumer can
/// never stall the transfer, and cancellation lands the attachment in
/// `failed` rather than a dangling `uploading`.
#[derive(Clone, Debug)]
pub struct AttachmentService {
    attachments: Arc<dyn AttachmentStore>,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    objects: Arc<dyn ObjectStore>,
    config: StorageConfig,
    metrics: Metrics,
}

impl AttachmentService {
    #[must_use]
    pub fn new(
        attachments: Arc<dyn AttachmentStore>,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        objects: Arc<dyn ObjectStore>,
        config: StorageConfig,
    ) -> Self {
        Self { attachments, messages, conversations, objects, config, metrics: Metrics::new() }
    }

    /// Uploads attachment bytes for a message the caller sent.
    ///
    /// Retrying after a failure reuses the message's attachment row, so a
    /// message never accumulates a second upload binding.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if the declared or observed size
    /// exceeds the limit, `AppError::Forbidden` unless the caller sent the
    /// message, `AppError::Conflict` when an upload is already in flight or
    /// complete, and `AppError::UploadFailed` on cancellation or I/O failure.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, body, progress, cancel),
        fields(message_id = %message_id, attachment_id = tracing::field::Empty)
    )]
    pub async fn upload(
        &self,
        message_id: Uuid,
        uploader_id: Uuid,
        content_len: Option<usize>,
        body: ObjectStream,
        progress: watch::Sender<u8>,
        cancel: CancellationToken,
    ) -> Result<Attachment> {
        if let Some(len) = content_len
            && len > self.config.attachment_max_size_bytes
        {
            return Err(AppError::BadRequest("Attachment too large".into()));
        }

        let message = self.messages.get(message_id).await?.ok_or(AppError::NotFound)?;
        if message.sender_id != uploader_id {
            return Err(AppError::Forbidden);
        }

        let attachment = self.attachments.bind_for_upload(Uuid::now_v7(), message_id).await?;
        tracing::Span::current().record("attachment_id", tracing::field::display(attachment.id));

        self.attachments.set_state(attachment.id, UploadState::Uploading, None, 0).await?;

        let outcome = self.transfer(&attachment, content_len, body, &progress, &cancel).await;

        match outcome {
            Ok(transferred) => {
                let url = format!("/v1/attachments/{}", attachment.id);
                self.attachments.set_state(attachment.id, UploadState::Complete, Some(&url), 100).await?;
                let _ = progress.send(100);

                self.metrics.uploads_total.add(1, &[KeyValue::new("status", "complete")]);
                self.metrics.uploaded_bytes.add(transferred as u64, &[]);
                self.metrics.upload_size_bytes.record(transferred as u64, &[]);
                tracing::debug!(bytes = transferred, "Attachment upload complete");

                Ok(Attachment {
                    id: attachment.id,
                    message_id,
                    upload_state: UploadState::Complete,
                    url: Some(url),
                    progress_pct: 100,
                })
            }
            Err(e) => {
                if let Err(store_err) =
                    self.attachments.set_state(attachment.id, UploadState::Failed, None, 0).await
                {
                    tracing::error!(error = %store_err, "Failed to mark attachment as failed");
                }
                self.metrics.uploads_total.add(1, &[KeyValue::new("status", "failed")]);
                Err(e)
            }
        }
    }

    /// Pumps the inbound stream into the object store, counting bytes and
    /// reporting progress at bounded intervals along the way.
    async fn transfer(
        &self,
        attachment: &Attachment,
        content_len: Option<usize>,
        mut body: ObjectStream,
        progress: &watch::Sender<u8>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(2);
        let max_size = self.config.attachment_max_size_bytes;
        let step = self.config.progress_step_pct.max(1);
        let progress_tx = progress.clone();
        let pump_cancel = cancel.clone();

        let pump = tokio::spawn(
            async move {
                let mut transferred = 0usize;
                let mut last_pct = 0u8;

                loop {
                    tokio::select! {
                        () = pump_cancel.cancelled() => {
                            let _ = tx
                                .send(Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "upload cancelled")))
                                .await;
                            return Err(AppError::UploadFailed);
                        }
                        chunk = body.next() => match chunk {
                            Some(Ok(bytes)) => {
                                transferred += bytes.len();
                                if transferred > max_size {
                                    let _ = tx
                                        .send(Err(std::io::Error::new(
                                            std::io::ErrorKind::InvalidData,
                                            "attachment exceeds size limit",
                                        )))
                                        .await;
                                    return Err(AppError::BadRequest("Attachment too large".into()));
                                }

                                if let Some(total) = content_len
                                    && total > 0
                                {
                                    let pct = ((transferred.saturating_mul(100)) / total).min(99) as u8;
                                    if pct >= last_pct.saturating_add(step) {
                                        last_pct = pct;
                                        let _ = progress_tx.send(pct);
                                    }
                                }

                                if tx.send(Ok(bytes)).await.is_err() {
                                    // Receiver gone: the object store failed early.
                                    return Err(AppError::UploadFailed);
                                }
                            }
                            Some(Err(e)) => {
                                tracing::debug!(error = %e, "Inbound attachment stream failed");
                                let _ = tx.send(Err(e)).await;
                                return Err(AppError::UploadFailed);
                            }
                            None => return Ok(transferred),
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("attachment_pump")),
        );

        let key = attachment.id.to_string();
        let put_result = self.objects.put(&key, content_len, ReceiverStream::new(rx).boxed()).await;

        let pumped = pump.await.map_err(|e| {
            tracing::error!(error = %e, "Attachment pump task panicked");
            AppError::Internal
        })?;

        match (put_result, pumped) {
            (Ok(()), Ok(transferred)) => Ok(transferred),
            (_, Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
        }
    }

    /// Streams attachment bytes back to a participant of the message's
    /// conversation.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` unless the attachment exists and is
    /// complete, and `AppError::NotAParticipant` for outsiders.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(attachment_id = %attachment_id))]
    pub async fn download(&self, attachment_id: Uuid, user_id: Uuid) -> Result<(u64, ObjectStream)> {
        let attachment = self.attachments.get(attachment_id).await?.ok_or(AppError::NotFound)?;
        if attachment.upload_state != UploadState::Complete {
            return Err(AppError::NotFound);
        }

        let message = self.messages.get(attachment.message_id).await?.ok_or(AppError::NotFound)?;
        if !self.conversations.is_participant(message.conversation_id, user_id).await? {
            return Err(AppError::NotAParticipant);
        }

        self.objects.get(&attachment.id.to_string()).await
    }

    /// Current state of a message's attachment slot, if any.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the lookup fails.
    pub async fn for_message(&self, message_id: Uuid) -> Result<Option<Attachment>> {
        self.attachments.find_by_message(message_id).await
    }
}
