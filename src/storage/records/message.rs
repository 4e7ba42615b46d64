use crate::domain::attachment::Attachment;
use crate::domain::message::{Message, MessageType, Reaction, ReactionKind};
use crate::error::{AppError, Result};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub seq: i64,
    pub message_type: String,
    pub content: String,
    pub reply_to_message_id: Option<Uuid>,
    pub is_paid: bool,
    pub price_cents: Option<i64>,
    pub created_at: OffsetDateTime,
    pub edited_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReactionRecord {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
}

impl MessageRecord {
    pub(crate) fn into_domain(self, reactions: Vec<Reaction>, attachments: Vec<Attachment>) -> Result<Message> {
        let message_type: MessageType = self.message_type.parse().map_err(|e: String| {
            tracing::error!(error = %e, message_id = %self.id, "Corrupt message row");
            AppError::Internal
        })?;

        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            seq: self.seq,
            message_type,
            content: self.content,
            reply_to_message_id: self.reply_to_message_id,
            is_paid: self.is_paid,
            price_cents: self.price_cents,
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
            reactions,
            attachments,
        })
    }
}

impl ReactionRecord {
    pub(crate) fn into_domain(self) -> Result<Reaction> {
        let kind: ReactionKind = self.kind.parse().map_err(|e: String| {
            tracing::error!(error = %e, message_id = %self.message_id, "Corrupt reaction row");
            AppError::Internal
        })?;

        Ok(Reaction { message_id: self.message_id, user_id: self.user_id, kind })
    }
}
