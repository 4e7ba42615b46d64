use crate::domain::attachment::Attachment;
use crate::domain::message::{Message, MessageType, Reaction, ReactionKind, ReportReason};
use crate::error::{AppError, Result};
use crate::storage::DbPool;
use crate::storage::records::attachment::AttachmentRecord;
use crate::storage::records::message::{MessageRecord, ReactionRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: String,
    pub reply_to_message_id: Option<Uuid>,
    pub is_paid: bool,
    pub price_cents: Option<i64>,
}

/// Append-only per-conversation message ledger with edit/delete overlays,
/// reactions and moderation reports.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Inserts the message, assigning the next seq in the conversation.
    /// Callers must hold the conversation writer lock.
    async fn append(&self, new: NewMessage) -> Result<Message>;

    async fn get(&self, id: Uuid) -> Result<Option<Message>>;

    async fn set_content(&self, id: Uuid, content: &str, edited_at: OffsetDateTime) -> Result<Message>;

    /// Clears content and stamps `deleted_at`; id and seq are retained.
    async fn tombstone(&self, id: Uuid, deleted_at: OffsetDateTime) -> Result<Message>;

    /// Returns false when the reaction already existed (no-op).
    async fn add_reaction(&self, message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Result<bool>;

    /// Returns false when there was nothing to remove (no-op).
    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Result<bool>;

    /// Newest-first page; `before_seq` excludes that seq and everything after.
    async fn list_page(&self, conversation_id: Uuid, before_seq: Option<i64>, limit: i64) -> Result<Vec<Message>>;

    /// Content search scoped to conversations the user participates in.
    async fn search(&self, user_id: Uuid, query: &str, conversation_id: Option<Uuid>, limit: i64)
    -> Result<Vec<Message>>;

    async fn create_report(
        &self,
        id: Uuid,
        message_id: Uuid,
        reporter_id: Uuid,
        reason: ReportReason,
        description: Option<&str>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgMessageRepository {
    pool: DbPool,
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, seq, message_type, content, \
     reply_to_message_id, is_paid, price_cents, created_at, edited_at, deleted_at";

impl PgMessageRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, records: Vec<MessageRecord>) -> Result<Vec<Message>> {
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();

        let reaction_rows = sqlx::query_as::<_, ReactionRecord>(
            "SELECT message_id, user_id, kind FROM message_reactions WHERE message_id = ANY($1) ORDER BY created_at",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let attachment_rows = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT id, message_id, upload_state, url, progress_pct FROM attachments WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut reactions: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            let reaction = row.into_domain()?;
            reactions.entry(reaction.message_id).or_default().push(reaction);
        }

        let mut attachments: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for row in attachment_rows {
            let attachment = row.into_domain()?;
            attachments.entry(attachment.message_id).or_default().push(attachment);
        }

        records
            .into_iter()
            .map(|record| {
                let id = record.id;
                record.into_domain(
                    reactions.remove(&id).unwrap_or_default(),
                    attachments.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn hydrate_one(&self, record: MessageRecord) -> Result<Message> {
        let mut messages = self.hydrate(vec![record]).await?;
        messages.pop().ok_or(AppError::Internal)
    }
}

#[async_trait]
impl MessageStore for PgMessageRepository {
    async fn append(&self, new: NewMessage) -> Result<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r"
            INSERT INTO messages (id, conversation_id, sender_id, seq, message_type, content,
                                  reply_to_message_id, is_paid, price_cents)
            VALUES ($1, $2, $3,
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = $2),
                    $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(new.id)
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(new.message_type.as_str())
        .bind(&new.content)
        .bind(new.reply_to_message_id)
        .bind(new.is_paid)
        .bind(new.price_cents)
        .fetch_one(&self.pool)
        .await?;

        record.into_domain(Vec::new(), Vec::new())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        let record =
            sqlx::query_as::<_, MessageRecord>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match record {
            Some(record) => Ok(Some(self.hydrate_one(record).await?)),
            None => Ok(None),
        }
    }

    async fn set_content(&self, id: Uuid, content: &str, edited_at: OffsetDateTime) -> Result<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET content = $2, edited_at = $3 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(content)
        .bind(edited_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)?;

        self.hydrate_one(record).await
    }

    async fn tombstone(&self, id: Uuid, deleted_at: OffsetDateTime) -> Result<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET content = '', deleted_at = $2 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(deleted_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)?;

        self.hydrate_one(record).await
    }

    async fn add_reaction(&self, message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO message_reactions (message_id, user_id, kind)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND kind = $3")
                .bind(message_id)
                .bind(user_id)
                .bind(kind.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_page(&self, conversation_id: Uuid, before_seq: Option<i64>, limit: i64) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1 AND ($2::bigint IS NULL OR seq < $2)
            ORDER BY seq DESC
            LIMIT $3
            "
        ))
        .bind(conversation_id)
        .bind(before_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(records).await
    }

    async fn search(
        &self,
        user_id: Uuid,
        query: &str,
        conversation_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r"
            SELECT m.{cols} FROM messages m
            JOIN conversation_participants p
              ON p.conversation_id = m.conversation_id AND p.user_id = $1
            WHERE m.deleted_at IS NULL
              AND m.content ILIKE '%' || $2 || '%'
              AND ($3::uuid IS NULL OR m.conversation_id = $3)
            ORDER BY m.created_at DESC
            LIMIT $4
            ",
            cols = MESSAGE_COLUMNS.replace(", ", ", m.")
        ))
        .bind(user_id)
        .bind(query)
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(records).await
    }

    async fn create_report(
        &self,
        id: Uuid,
        message_id: Uuid,
        reporter_id: Uuid,
        reason: ReportReason,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO message_reports (id, message_id, reporter_id, reason, description)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(id)
        .bind(message_id)
        .bind(reporter_id)
        .bind(reason.as_str())
        .bind(description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
