use crate::config::MessagingConfig;
use crate::domain::cursor::Cursor;
use crate::domain::event::{Channel, ChatEvent};
use crate::domain::message::{Message, MessageType, ReactionKind, ReportReason};
use crate::error::{AppError, Result};
use crate::storage::{ConversationStore, MessageStore, NewMessage};
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    appended_total: Counter<u64>,
    page_size: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confab-server");
        Self {
            appended_total: meter
                .u64_counter("messages_appended_total")
                .with_description("Total messages appended to the ledger")
                .build(),
            page_size: meter
                .u64_histogram("messages_page_size")
                .with_description("Number of messages returned per list page")
                .build(),
        }
    }
}

/// Per-conversation async writer locks. Writers to the same conversation
/// queue here so seq assignment and tombstoning are linearizable; writers to
/// different conversations proceed fully in parallel.
#[derive(Clone, Debug, Default)]
struct ConversationLocks {
    locks: Arc<DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationLocks {
    fn for_conversation(&self, conversation_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.entry(conversation_id).or_default().value())
    }
}

/// Fields of an append request that arrive from the caller.
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    pub message_type: MessageType,
    pub content: String,
    pub reply_to_message_id: Option<Uuid>,
    pub is_paid: bool,
    pub price_cents: Option<i64>,
    pub correlation_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    fanout: super::fanout::FanoutService,
    locks: ConversationLocks,
    config: MessagingConfig,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        fanout: super::fanout::FanoutService,
        config: MessagingConfig,
    ) -> Self {
        Self { store, conversations, fanout, locks: ConversationLocks::default(), config, metrics: Metrics::new() }
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(AppError::BadRequest("Message content must not be empty".into()));
        }
        if content.chars().count() > self.config.max_content_len {
            return Err(AppError::BadRequest("Message content too long".into()));
        }
        Ok(())
    }

    /// Appends a message to the conversation ledger.
    ///
    /// The durable write, the seq assignment and the `message.new` publish all
    /// happen under the conversation writer lock, so every subscriber observes
    /// events in exactly the order of successful writes.
    ///
    /// # Errors
    /// Returns `AppError::NotAParticipant` if the sender is not in the
    /// conversation and `AppError::NotFound` for an unknown conversation.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, outgoing),
        fields(conversation_id = %conversation_id, sender_id = %sender_id)
    )]
    pub async fn append(&self, conversation_id: Uuid, sender_id: Uuid, outgoing: OutgoingMessage) -> Result<Message> {
        self.validate_content(&outgoing.content)?;

        let conversation = super::retry::transient(&self.config, || self.conversations.get(conversation_id))
            .await?
            .ok_or(AppError::NotFound)?;

        if !conversation.has_participant(sender_id) {
            self.metrics.appended_total.add(1, &[KeyValue::new("status", "rejected")]);
            return Err(AppError::NotAParticipant);
        }

        let lock = self.locks.for_conversation(conversation_id);
        let guard = lock.lock().await;

        if let Some(reply_to) = outgoing.reply_to_message_id {
            let parent = super::retry::transient(&self.config, || self.store.get(reply_to))
                .await?
                .ok_or(AppError::NotFound)?;
            if parent.conversation_id != conversation_id {
                return Err(AppError::BadRequest("Reply target belongs to another conversation".into()));
            }
        }

        let new = NewMessage {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            message_type: outgoing.message_type,
            content: outgoing.content,
            reply_to_message_id: outgoing.reply_to_message_id,
            is_paid: outgoing.is_paid,
            price_cents: outgoing.price_cents,
        };

        let message = super::retry::transient(&self.config, || self.store.append(new.clone())).await?;

        super::retry::transient(&self.config, || {
            self.conversations.record_message(conversation_id, sender_id, message.created_at)
        })
        .await?;

        self.fanout.publish(
            Channel::Conversation(conversation_id),
            ChatEvent::MessageNew {
                conversation_id,
                message: message.clone(),
                correlation_id: outgoing.correlation_id,
            },
        );

        drop(guard);

        self.metrics.appended_total.add(1, &[KeyValue::new("status", "success")]);
        tracing::debug!(message_id = %message.id, seq = message.seq, "Message appended");

        // Conversation-list summaries ride the per-user feed channels.
        if let Some(updated) = super::retry::transient(&self.config, || self.conversations.get(conversation_id)).await?
        {
            for participant in &updated.participants {
                self.fanout.publish(
                    Channel::UserFeed(participant.user_id),
                    ChatEvent::ConversationUpdated { conversation: updated.clone(), actor_id: sender_id },
                );
            }
        }

        Ok(message)
    }

    /// Edits a message's content. Only the sender may edit, and tombstones
    /// are immutable.
    ///
    /// # Errors
    /// Returns `AppError::Forbidden` for non-senders and
    /// `AppError::AlreadyDeleted` for tombstones.
    #[tracing::instrument(err(level = "warn"), skip(self, new_content), fields(message_id = %message_id))]
    pub async fn edit(
        &self,
        message_id: Uuid,
        editor_id: Uuid,
        new_content: String,
        correlation_id: Option<Uuid>,
    ) -> Result<Message> {
        self.validate_content(&new_content)?;

        let message =
            super::retry::transient(&self.config, || self.store.get(message_id)).await?.ok_or(AppError::NotFound)?;

        let lock = self.locks.for_conversation(message.conversation_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent delete may have won.
        let message =
            super::retry::transient(&self.config, || self.store.get(message_id)).await?.ok_or(AppError::NotFound)?;

        if message.sender_id != editor_id {
            return Err(AppError::Forbidden);
        }
        if message.is_tombstone() {
            return Err(AppError::AlreadyDeleted);
        }

        let updated = super::retry::transient(&self.config, || {
            self.store.set_content(message_id, &new_content, OffsetDateTime::now_utc())
        })
        .await?;

        self.fanout.publish(
            Channel::Conversation(updated.conversation_id),
            ChatEvent::MessageEdited {
                conversation_id: updated.conversation_id,
                message: updated.clone(),
                correlation_id,
            },
        );

        Ok(updated)
    }

    /// Tombstones a message: content is cleared, id and seq survive so
    /// clients keep their ordering. Deleting a tombstone again is a no-op.
    ///
    /// # Errors
    /// Returns `AppError::Forbidden` unless the actor is the sender.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(message_id = %message_id))]
    pub async fn delete(&self, message_id: Uuid, actor_id: Uuid, correlation_id: Option<Uuid>) -> Result<()> {
        let message =
            super::retry::transient(&self.config, || self.store.get(message_id)).await?.ok_or(AppError::NotFound)?;

        let lock = self.locks.for_conversation(message.conversation_id);
        let _guard = lock.lock().await;

        let message =
            super::retry::transient(&self.config, || self.store.get(message_id)).await?.ok_or(AppError::NotFound)?;

        if message.sender_id != actor_id {
            return Err(AppError::Forbidden);
        }
        if message.is_tombstone() {
            return Ok(());
        }

        let deleted = super::retry::transient(&self.config, || {
            self.store.tombstone(message_id, OffsetDateTime::now_utc())
        })
        .await?;

        self.fanout.publish(
            Channel::Conversation(deleted.conversation_id),
            ChatEvent::MessageDeleted {
                conversation_id: deleted.conversation_id,
                message_id: deleted.id,
                seq: deleted.seq,
                actor_id,
                correlation_id,
            },
        );

        Ok(())
    }

    /// Adds a reaction. Duplicate adds are silent no-ops and emit nothing.
    ///
    /// # Errors
    /// Returns `AppError::NotAParticipant` for outsiders and
    /// `AppError::AlreadyDeleted` when reacting to a tombstone.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(message_id = %message_id))]
    pub async fn add_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        correlation_id: Option<Uuid>,
    ) -> Result<()> {
        let message =
            super::retry::transient(&self.config, || self.store.get(message_id)).await?.ok_or(AppError::NotFound)?;

        if !super::retry::transient(&self.config, || {
            self.conversations.is_participant(message.conversation_id, user_id)
        })
        .await?
        {
            return Err(AppError::NotAParticipant);
        }
        if message.is_tombstone() {
            return Err(AppError::AlreadyDeleted);
        }

        let lock = self.locks.for_conversation(message.conversation_id);
        let _guard = lock.lock().await;

        let added =
            super::retry::transient(&self.config, || self.store.add_reaction(message_id, user_id, kind)).await?;

        if added {
            self.fanout.publish(
                Channel::Conversation(message.conversation_id),
                ChatEvent::ReactionChanged {
                    conversation_id: message.conversation_id,
                    message_id,
                    user_id,
                    kind,
                    added: true,
                    correlation_id,
                },
            );
        }

        Ok(())
    }

    /// Removes a reaction. Removing one that does not exist is a no-op, not
    /// an error, and emits nothing.
    ///
    /// # Errors
    /// Returns `AppError::NotAParticipant` for outsiders.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(message_id = %message_id))]
    pub async fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        correlation_id: Option<Uuid>,
    ) -> Result<()> {
        let message =
            super::retry::transient(&self.config, || self.store.get(message_id)).await?.ok_or(AppError::NotFound)?;

        if !super::retry::transient(&self.config, || {
            self.conversations.is_participant(message.conversation_id, user_id)
        })
        .await?
        {
            return Err(AppError::NotAParticipant);
        }

        let lock = self.locks.for_conversation(message.conversation_id);
        let _guard = lock.lock().await;

        let removed =
            super::retry::transient(&self.config, || self.store.remove_reaction(message_id, user_id, kind)).await?;

        if removed {
            self.fanout.publish(
                Channel::Conversation(message.conversation_id),
                ChatEvent::ReactionChanged {
                    conversation_id: message.conversation_id,
                    message_id,
                    user_id,
                    kind,
                    added: false,
                    correlation_id,
                },
            );
        }

        Ok(())
    }

    /// Pages backward from newest. The opaque cursor pins the page boundary
    /// to a seq, so concurrent inserts neither duplicate nor skip entries.
    ///
    /// # Errors
    /// Returns `AppError::NotAParticipant` for outsiders and
    /// `AppError::BadRequest` for a malformed cursor.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self),
        fields(conversation_id = %conversation_id, user_id = %user_id)
    )]
    pub async fn list(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<MessagePage> {
        if !super::retry::transient(&self.config, || self.conversations.is_participant(conversation_id, user_id))
            .await?
        {
            return Err(AppError::NotAParticipant);
        }

        let limit = limit.unwrap_or(self.config.page_size_default).clamp(1, self.config.page_size_max);
        let before_seq = cursor.map(Cursor::decode).transpose()?.map(|c| c.before_seq);

        // One extra row tells us whether another page exists.
        let mut messages = super::retry::transient(&self.config, || {
            self.store.list_page(conversation_id, before_seq, limit + 1)
        })
        .await?;

        let has_more = messages.len() as i64 > limit;
        if has_more {
            messages.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        let next_cursor = if has_more {
            messages.last().map(|m| Cursor { before_seq: m.seq }.encode())
        } else {
            None
        };

        self.metrics.page_size.record(messages.len() as u64, &[]);
        Ok(MessagePage { messages, has_more, next_cursor })
    }

    /// Full-text search over content, always scoped to conversations the
    /// caller participates in.
    ///
    /// # Errors
    /// Returns `AppError::NotAParticipant` when an explicit conversation
    /// filter names a conversation the caller is not in.
    #[tracing::instrument(err(level = "warn"), skip(self, query), fields(user_id = %user_id))]
    pub async fn search(&self, user_id: Uuid, query: &str, conversation_id: Option<Uuid>) -> Result<Vec<Message>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(conversation_id) = conversation_id
            && !super::retry::transient(&self.config, || {
                self.conversations.is_participant(conversation_id, user_id)
            })
            .await?
        {
            return Err(AppError::NotAParticipant);
        }

        super::retry::transient(&self.config, || {
            self.store.search(user_id, query, conversation_id, self.config.search_limit)
        })
        .await
    }

    /// Records a moderation report for the external trust-and-safety
    /// collaborator.
    ///
    /// # Errors
    /// Returns `AppError::NotAParticipant` for outsiders.
    #[tracing::instrument(err(level = "warn"), skip(self, description), fields(message_id = %message_id))]
    pub async fn report(
        &self,
        message_id: Uuid,
        reporter_id: Uuid,
        reason: ReportReason,
        description: Option<&str>,
    ) -> Result<()> {
        let message =
            super::retry::transient(&self.config, || self.store.get(message_id)).await?.ok_or(AppError::NotFound)?;

        if !super::retry::transient(&self.config, || {
            self.conversations.is_participant(message.conversation_id, reporter_id)
        })
        .await?
        {
            return Err(AppError::NotAParticipant);
        }

        super::retry::transient(&self.config, || {
            self.store.create_report(Uuid::now_v7(), message_id, reporter_id, reason, description)
        })
        .await
    }
}
