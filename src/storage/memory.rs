use crate::domain::attachment::{Attachment, UploadState};
use crate::domain::conversation::{Conversation, ConversationKind, Participant};
use crate::domain::message::{Message, Reaction, ReactionKind, ReportReason};
use crate::error::{AppError, Result};
use crate::storage::attachment_repo::AttachmentStore;
use crate::storage::conversation_repo::ConversationStore;
use crate::storage::message_repo::{MessageStore, NewMessage};
use crate::storage::presence_repo::PresenceStore;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory store with the same semantics as the Postgres backend. Backs the
/// hermetic test suite; everything lives behind one async `RwLock` since test
/// workloads are tiny.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    conversations: HashMap<Uuid, Conversation>,
    direct_keys: HashMap<String, Uuid>,
    messages: HashMap<Uuid, Message>,
    /// Per-conversation message ids in seq order.
    ledger: HashMap<Uuid, Vec<Uuid>>,
    reports: Vec<StoredReport>,
    last_seen: HashMap<Uuid, OffsetDateTime>,
    attachments: HashMap<Uuid, Attachment>,
    attachment_by_message: HashMap<Uuid, Uuid>,
}

#[derive(Debug)]
#[allow(dead_code)]
struct StoredReport {
    id: Uuid,
    message_id: Uuid,
    reporter_id: Uuid,
    reason: ReportReason,
    description: Option<String>,
}

impl State {
    fn hydrated(&self, message: &Message) -> Message {
        let mut message = message.clone();
        message.attachments = self
            .attachment_by_message
            .get(&message.id)
            .and_then(|id| self.attachments.get(id))
            .map(|a| vec![a.clone()])
            .unwrap_or_default();
        message
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_direct(&self, id: Uuid, a: Uuid, b: Uuid, key: &str) -> Result<Conversation> {
        let mut state = self.inner.write().await;

        if state.direct_keys.contains_key(key) {
            return Err(AppError::Conflict("Direct conversation already exists".into()));
        }

        let now = OffsetDateTime::now_utc();
        let conversation = Conversation {
            id,
            kind: ConversationKind::Direct,
            participants: [a, b]
                .into_iter()
                .map(|user_id| Participant {
                    user_id,
                    joined_at: now,
                    unread_count: 0,
                    last_read_message_id: None,
                    last_read_seq: 0,
                })
                .collect(),
            created_at: now,
            last_message_at: None,
        };

        state.direct_keys.insert(key.to_string(), id);
        state.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn find_direct(&self, key: &str) -> Result<Option<Conversation>> {
        let state = self.inner.read().await;
        Ok(state.direct_keys.get(key).and_then(|id| state.conversations.get(id)).cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let state = self.inner.read().await;
        let mut conversations: Vec<Conversation> =
            state.conversations.values().filter(|c| c.has_participant(user_id)).cloned().collect();

        // last_message_at DESC NULLS LAST, then created_at DESC.
        conversations.sort_by(|a, b| match (b.last_message_at, a.last_message_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => b.created_at.cmp(&a.created_at),
        });

        Ok(conversations)
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let state = self.inner.read().await;
        Ok(state.conversations.get(&conversation_id).is_some_and(|c| c.has_participant(user_id)))
    }

    async fn record_message(&self, conversation_id: Uuid, sender_id: Uuid, at: OffsetDateTime) -> Result<()> {
        let mut state = self.inner.write().await;
        let conversation = state.conversations.get_mut(&conversation_id).ok_or(AppError::NotFound)?;

        conversation.last_message_at = Some(at);
        for participant in &mut conversation.participants {
            if participant.user_id != sender_id {
                participant.unread_count += 1;
            }
        }
        Ok(())
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, up_to_seq: i64, up_to_id: Uuid) -> Result<bool> {
        let mut state = self.inner.write().await;

        let unread = state
            .ledger
            .get(&conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.messages.get(id))
                    .filter(|m| m.seq > up_to_seq && m.sender_id != user_id)
                    .count() as i64
            })
            .unwrap_or(0);

        let conversation = state.conversations.get_mut(&conversation_id).ok_or(AppError::NotFound)?;
        let Some(participant) = conversation.participants.iter_mut().find(|p| p.user_id == user_id) else {
            return Ok(false);
        };

        if participant.last_read_seq >= up_to_seq {
            return Ok(false);
        }

        participant.last_read_seq = up_to_seq;
        participant.last_read_message_id = Some(up_to_id);
        participant.unread_count = unread;
        Ok(true)
    }

    async fn unread_total(&self, user_id: Uuid) -> Result<i64> {
        let state = self.inner.read().await;
        Ok(state
            .conversations
            .values()
            .filter_map(|c| c.participant(user_id))
            .map(|p| p.unread_count)
            .sum())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, new: NewMessage) -> Result<Message> {
        let mut state = self.inner.write().await;

        if !state.conversations.contains_key(&new.conversation_id) {
            return Err(AppError::NotFound);
        }

        let seq = state
            .ledger
            .get(&new.conversation_id)
            .and_then(|ids| ids.last())
            .and_then(|id| state.messages.get(id))
            .map_or(0, |m| m.seq)
            + 1;

        let message = Message {
            id: new.id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            seq,
            message_type: new.message_type,
            content: new.content,
            reply_to_message_id: new.reply_to_message_id,
            is_paid: new.is_paid,
            price_cents: new.price_cents,
            created_at: OffsetDateTime::now_utc(),
            edited_at: None,
            deleted_at: None,
            reactions: Vec::new(),
            attachments: Vec::new(),
        };

        state.ledger.entry(new.conversation_id).or_default().push(message.id);
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        let state = self.inner.read().await;
        Ok(state.messages.get(&id).map(|m| state.hydrated(m)))
    }

    async fn set_content(&self, id: Uuid, content: &str, edited_at: OffsetDateTime) -> Result<Message> {
        let mut state = self.inner.write().await;
        let message = state.messages.get_mut(&id).ok_or(AppError::NotFound)?;
        message.content = content.to_string();
        message.edited_at = Some(edited_at);
        let message = message.clone();
        Ok(state.hydrated(&message))
    }

    async fn tombstone(&self, id: Uuid, deleted_at: OffsetDateTime) -> Result<Message> {
        let mut state = self.inner.write().await;
        let message = state.messages.get_mut(&id).ok_or(AppError::NotFound)?;
        message.content.clear();
        message.deleted_at = Some(deleted_at);
        let message = message.clone();
        Ok(state.hydrated(&message))
    }

    async fn add_reaction(&self, message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Result<bool> {
        let mut state = self.inner.write().await;
        let message = state.messages.get_mut(&message_id).ok_or(AppError::NotFound)?;

        if message.reactions.iter().any(|r| r.user_id == user_id && r.kind == kind) {
            return Ok(false);
        }

        message.reactions.push(Reaction { message_id, user_id, kind });
        Ok(true)
    }

    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Result<bool> {
        let mut state = self.inner.write().await;
        let message = state.messages.get_mut(&message_id).ok_or(AppError::NotFound)?;

        let before = message.reactions.len();
        message.reactions.retain(|r| !(r.user_id == user_id && r.kind == kind));
        Ok(message.reactions.len() < before)
    }

    async fn list_page(&self, conversation_id: Uuid, before_seq: Option<i64>, limit: i64) -> Result<Vec<Message>> {
        let state = self.inner.read().await;
        let Some(ids) = state.ledger.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        let page: Vec<Message> = ids
            .iter()
            .rev()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| before_seq.is_none_or(|cutoff| m.seq < cutoff))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|m| state.hydrated(m))
            .collect();

        Ok(page)
    }

    async fn search(
        &self,
        user_id: Uuid,
        query: &str,
        conversation_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let state = self.inner.read().await;
        let needle = query.to_lowercase();

        let mut hits: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.deleted_at.is_none())
            .filter(|m| conversation_id.is_none_or(|cid| m.conversation_id == cid))
            .filter(|m| {
                state.conversations.get(&m.conversation_id).is_some_and(|c| c.has_participant(user_id))
            })
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .map(|m| state.hydrated(m))
            .collect();

        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(hits)
    }

    async fn create_report(
        &self,
        id: Uuid,
        message_id: Uuid,
        reporter_id: Uuid,
        reason: ReportReason,
        description: Option<&str>,
    ) -> Result<()> {
        let mut state = self.inner.write().await;
        if !state.messages.contains_key(&message_id) {
            return Err(AppError::NotFound);
        }

        state.reports.push(StoredReport {
            id,
            message_id,
            reporter_id,
            reason,
            description: description.map(ToString::to_string),
        });
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn record_last_seen(&self, user_id: Uuid, at: OffsetDateTime) -> Result<()> {
        self.inner.write().await.last_seen.insert(user_id, at);
        Ok(())
    }

    async fn fetch_last_seen(&self, user_id: Uuid) -> Result<Option<OffsetDateTime>> {
        Ok(self.inner.read().await.last_seen.get(&user_id).copied())
    }
}

#[async_trait]
impl AttachmentStore for MemoryStore {
    async fn bind_for_upload(&self, candidate_id: Uuid, message_id: Uuid) -> Result<Attachment> {
        let mut state = self.inner.write().await;

        if let Some(existing_id) = state.attachment_by_message.get(&message_id).copied() {
            let existing = state.attachments.get_mut(&existing_id).ok_or(AppError::Internal)?;
            return match existing.upload_state {
                UploadState::Uploading => {
                    Err(AppError::Conflict("An upload is already in flight for this message".into()))
                }
                UploadState::Complete => Err(AppError::Conflict("Message already has an attachment".into())),
                UploadState::Pending | UploadState::Failed => {
                    existing.upload_state = UploadState::Pending;
                    existing.url = None;
                    existing.progress_pct = 0;
                    Ok(existing.clone())
                }
            };
        }

        let attachment = Attachment {
            id: candidate_id,
            message_id,
            upload_state: UploadState::Pending,
            url: None,
            progress_pct: 0,
        };
        state.attachments.insert(candidate_id, attachment.clone());
        state.attachment_by_message.insert(message_id, candidate_id);
        Ok(attachment)
    }

    async fn set_state(&self, id: Uuid, state_: UploadState, url: Option<&str>, progress_pct: i16) -> Result<()> {
        let mut state = self.inner.write().await;
        let attachment = state.attachments.get_mut(&id).ok_or(AppError::NotFound)?;
        attachment.upload_state = state_;
        attachment.url = url.map(ToString::to_string);
        attachment.progress_pct = u8::try_from(progress_pct.clamp(0, 100)).unwrap_or(100);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Attachment>> {
        Ok(self.inner.read().await.attachments.get(&id).cloned())
    }

    async fn find_by_message(&self, message_id: Uuid) -> Result<Option<Attachment>> {
        let state = self.inner.read().await;
        Ok(state.attachment_by_message.get(&message_id).and_then(|id| state.attachments.get(id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageType;

    fn new_message(conversation_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            message_type: MessageType::Text,
            content: content.to_string(),
            reply_to_message_id: None,
            is_paid: false,
            price_cents: None,
        }
    }

    #[tokio::test]
    async fn test_seq_assignment_is_dense_and_monotone() {
        let store = MemoryStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = store.create_direct(Uuid::now_v7(), a, b, "k").await.unwrap();

        for expected in 1..=5 {
            let msg = store.append(new_message(conv.id, a, "hi")).await.unwrap();
            assert_eq!(msg.seq, expected);
        }
    }

    #[tokio::test]
    async fn test_duplicate_direct_key_conflicts() {
        let store = MemoryStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.create_direct(Uuid::now_v7(), a, b, "pair").await.unwrap();

        let second = store.create_direct(Uuid::now_v7(), b, a, "pair").await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_mark_read_is_monotone() {
        let store = MemoryStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = store.create_direct(Uuid::now_v7(), a, b, "k").await.unwrap();

        let m1 = store.append(new_message(conv.id, a, "one")).await.unwrap();
        let m2 = store.append(new_message(conv.id, a, "two")).await.unwrap();
        store.record_message(conv.id, a, m2.created_at).await.unwrap();
        store.record_message(conv.id, a, m2.created_at).await.unwrap();

        assert!(store.mark_read(conv.id, b, m2.seq, m2.id).await.unwrap());
        // Moving the pointer backwards is a no-op.
        assert!(!store.mark_read(conv.id, b, m1.seq, m1.id).await.unwrap());

        let conv = ConversationStore::get(&store, conv.id).await.unwrap().unwrap();
        assert_eq!(conv.participant(b).unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_tombstone_keeps_id_and_seq() {
        let store = MemoryStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = store.create_direct(Uuid::now_v7(), a, b, "k").await.unwrap();
        let msg = store.append(new_message(conv.id, a, "secret")).await.unwrap();

        let dead = store.tombstone(msg.id, OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(dead.id, msg.id);
        assert_eq!(dead.seq, msg.seq);
        assert!(dead.content.is_empty());
        assert!(dead.is_tombstone());
    }

    #[tokio::test]
    async fn test_reaction_uniqueness_and_idempotent_removal() {
        let store = MemoryStore::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = store.create_direct(Uuid::now_v7(), a, b, "k").await.unwrap();
        let msg = store.append(new_message(conv.id, a, "hello")).await.unwrap();

        assert!(store.add_reaction(msg.id, b, ReactionKind::Like).await.unwrap());
        assert!(!store.add_reaction(msg.id, b, ReactionKind::Like).await.unwrap());

        let stored = MessageStore::get(&store, msg.id).await.unwrap().unwrap();
        assert_eq!(stored.reactions.len(), 1);

        assert!(store.remove_reaction(msg.id, b, ReactionKind::Like).await.unwrap());
        assert!(!store.remove_reaction(msg.id, b, ReactionKind::Like).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_excludes_foreign_conversations() {
        let store = MemoryStore::default();
        let (a, b, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = store.create_direct(Uuid::now_v7(), a, b, "k").await.unwrap();
        store.append(new_message(conv.id, a, "the invoice is attached")).await.unwrap();

        let hits = store.search(a, "invoice", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = store.search(outsider, "invoice", None, 10).await.unwrap();
        assert!(hits.is_empty());
    }
}
