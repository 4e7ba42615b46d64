use crate::domain::conversation::Conversation;
use crate::error::{AppError, Result};
use crate::storage::DbPool;
use crate::storage::records::conversation::{ConversationRecord, ParticipantRecord};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Durable record of conversations and their participants.
#[async_trait]
pub trait ConversationStore: Send + Sync + std::fmt::Debug {
    /// Creates a direct conversation for the canonical pair key.
    ///
    /// Returns `AppError::Conflict` when another writer created the pair
    /// concurrently; the caller retries and picks up the winning row.
    async fn create_direct(&self, id: Uuid, a: Uuid, b: Uuid, key: &str) -> Result<Conversation>;

    async fn find_direct(&self, key: &str) -> Result<Option<Conversation>>;

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// All conversations the user participates in, most recent activity first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>>;

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Bumps `last_message_at` and increments every other participant's
    /// unread count after a successful append.
    async fn record_message(&self, conversation_id: Uuid, sender_id: Uuid, at: OffsetDateTime) -> Result<()>;

    /// Advances the user's read pointer and recomputes the unread count.
    /// Returns false when the pointer would move backwards (no-op).
    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, up_to_seq: i64, up_to_id: Uuid) -> Result<bool>;

    async fn unread_total(&self, user_id: Uuid) -> Result<i64>;
}

#[derive(Debug, Clone)]
pub struct PgConversationRepository {
    pool: DbPool,
}

impl PgConversationRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_participants(&self, conversation_ids: &[Uuid]) -> Result<Vec<ParticipantRecord>> {
        let rows = sqlx::query_as::<_, ParticipantRecord>(
            r"
            SELECT conversation_id, user_id, joined_at, unread_count, last_read_message_id, last_read_seq
            FROM conversation_participants
            WHERE conversation_id = ANY($1)
            ORDER BY joined_at ASC
            ",
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn hydrate(&self, records: Vec<ConversationRecord>) -> Result<Vec<Conversation>> {
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let mut participants = self.load_participants(&ids).await?;

        let mut conversations = Vec::with_capacity(records.len());
        for record in records {
            let mine = participants.extract_if(.., |p| p.conversation_id == record.id).collect::<Vec<_>>();
            conversations.push(record.into_domain(mine)?);
        }
        Ok(conversations)
    }

    async fn fetch_one(&self, record: ConversationRecord) -> Result<Conversation> {
        let participants = self.load_participants(&[record.id]).await?;
        record.into_domain(participants)
    }
}

#[async_trait]
impl ConversationStore for PgConversationRepository {
    async fn create_direct(&self, id: Uuid, a: Uuid, b: Uuid, key: &str) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query_as::<_, ConversationRecord>(
            r"
            INSERT INTO conversations (id, kind, direct_key)
            VALUES ($1, 'direct', $2)
            RETURNING id, kind, created_at, last_message_at
            ",
        )
        .bind(id)
        .bind(key)
        .fetch_one(&mut *tx)
        .await;

        let record = match insert {
            Ok(record) => record,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(AppError::Conflict("Direct conversation already exists".into()));
            }
            Err(e) => return Err(e.into()),
        };

        sqlx::query(
            r"
            INSERT INTO conversation_participants (conversation_id, user_id)
            VALUES ($1, $2), ($1, $3)
            ",
        )
        .bind(id)
        .bind(a)
        .bind(b)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.fetch_one(record).await
    }

    async fn find_direct(&self, key: &str) -> Result<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, kind, created_at, last_message_at FROM conversations WHERE direct_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Ok(Some(self.fetch_one(record).await?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, kind, created_at, last_message_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Ok(Some(self.fetch_one(record).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r"
            SELECT c.id, c.kind, c.created_at, c.last_message_at
            FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(records).await
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn record_message(&self, conversation_id: Uuid, sender_id: Uuid, at: OffsetDateTime) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE conversations SET last_message_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r"
            UPDATE conversation_participants
            SET unread_count = unread_count + 1
            WHERE conversation_id = $1 AND user_id <> $2
            ",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, up_to_seq: i64, up_to_id: Uuid) -> Result<bool> {
        // The last_read_seq guard keeps the read pointer monotone under
        // concurrent mark-read calls from multiple devices.
        let result = sqlx::query(
            r"
            UPDATE conversation_participants
            SET last_read_seq = $3,
                last_read_message_id = $4,
                unread_count = (
                    SELECT COUNT(*) FROM messages m
                    WHERE m.conversation_id = $1 AND m.seq > $3 AND m.sender_id <> $2
                )
            WHERE conversation_id = $1 AND user_id = $2 AND last_read_seq < $3
            ",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(up_to_seq)
        .bind(up_to_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unread_total(&self, user_id: Uuid) -> Result<i64> {
        let (total,): (i64,) =
            sqlx::query_as(
                "SELECT COALESCE(SUM(unread_count), 0)::bigint FROM conversation_participants WHERE user_id = $1",
            )
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(total)
    }
}
