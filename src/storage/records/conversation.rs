use crate::domain::conversation::{Conversation, ConversationKind, Participant};
use crate::error::{AppError, Result};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ConversationRecord {
    pub id: Uuid,
    pub kind: String,
    pub created_at: OffsetDateTime,
    pub last_message_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ParticipantRecord {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: OffsetDateTime,
    pub unread_count: i64,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_seq: i64,
}

impl ConversationRecord {
    pub(crate) fn into_domain(self, participants: Vec<ParticipantRecord>) -> Result<Conversation> {
        let kind: ConversationKind = self.kind.parse().map_err(|e: String| {
            tracing::error!(error = %e, conversation_id = %self.id, "Corrupt conversation row");
            AppError::Internal
        })?;

        Ok(Conversation {
            id: self.id,
            kind,
            participants: participants.into_iter().map(ParticipantRecord::into_domain).collect(),
            created_at: self.created_at,
            last_message_at: self.last_message_at,
        })
    }
}

impl ParticipantRecord {
    fn into_domain(self) -> Participant {
        Participant {
            user_id: self.user_id,
            joined_at: self.joined_at,
            unread_count: self.unread_count,
            last_read_message_id: self.last_read_message_id,
            last_read_seq: self.last_read_seq,
        }
    }
}
