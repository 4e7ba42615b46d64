use crate::config::MessagingConfig;
use crate::domain::conversation::{Conversation, direct_key};
use crate::domain::event::{Channel, ChatEvent};
use crate::error::{AppError, Result};
use crate::storage::{ConversationStore, MessageStore};
use backon::{ExponentialBuilder, Retryable};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    direct_created_total: Counter<u64>,
    mark_read_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confab-server");
        Self {
            direct_created_total: meter
                .u64_counter("conversations_direct_created_total")
                .with_description("Direct conversation get-or-create outcomes")
                .build(),
            mark_read_total: meter
                .u64_counter("conversations_mark_read_total")
                .with_description("Total mark-read operations that advanced a read pointer")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    fanout: super::fanout::FanoutService,
    config: MessagingConfig,
    metrics: Metrics,
}

impl ConversationService {
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        fanout: super::fanout::FanoutService,
        config: MessagingConfig,
    ) -> Self {
        Self { store, messages, fanout, config, metrics: Metrics::new() }
    }

    /// Lists the user's conversations, most recent activity first.
    ///
    /// # Errors
    /// Returns `AppError::StoreUnavailable` if the store stays unreachable.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(user_id = %user_id))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        super::retry::transient(&self.config, || self.store.list_for_user(user_id)).await
    }

    /// Idempotent get-or-create for the unordered user pair.
    ///
    /// Both sides racing to message each other for the first time converge on
    /// one canonical conversation: the unique pair key makes the losing insert
    /// conflict, and the retry picks up the winner's row.
    ///
    /// # Errors
    /// Returns `AppError::ConflictRetryExhausted` after bounded retries.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> Result<Conversation> {
        if user_a == user_b {
            return Err(AppError::BadRequest("A direct conversation needs two distinct users".into()));
        }

        let key = direct_key(user_a, user_b);
        let attempt = || async {
            if let Some(existing) = self.store.find_direct(&key).await? {
                return Ok((existing, false));
            }
            self.store.create_direct(Uuid::now_v7(), user_a, user_b, &key).await.map(|c| (c, true))
        };

        let strategy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.config.direct_retry_min_delay_ms))
            .with_max_times(self.config.direct_retry_attempts);

        let result = attempt
            .retry(strategy)
            .when(|e| matches!(e, AppError::Conflict(_)))
            .notify(|_, duration| {
                tracing::debug!(backoff = ?duration, "Direct conversation race, retrying");
            })
            .await;

        match result {
            Ok((conversation, created)) => {
                let outcome = if created { "created" } else { "existing" };
                self.metrics.direct_created_total.add(1, &[KeyValue::new("outcome", outcome)]);

                if created {
                    for participant in &conversation.participants {
                        self.fanout.publish(
                            Channel::UserFeed(participant.user_id),
                            ChatEvent::ConversationUpdated { conversation: conversation.clone(), actor_id: user_a },
                        );
                    }
                }
                Ok(conversation)
            }
            Err(AppError::Conflict(_)) => Err(AppError::ConflictRetryExhausted),
            Err(e) => Err(e),
        }
    }

    /// Advances the read pointer up to a message and recomputes the unread
    /// count. Monotone: a stale pointer is a no-op, and the unread count never
    /// resurrects for messages the user already acknowledged.
    ///
    /// # Errors
    /// Returns `AppError::NotAParticipant` if the caller is not in the
    /// conversation, `AppError::NotFound` for an unknown message, and
    /// `AppError::BadRequest` when the message belongs elsewhere.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self),
        fields(conversation_id = %conversation_id, user_id = %user_id)
    )]
    pub async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, up_to_message_id: Uuid) -> Result<()> {
        if !super::retry::transient(&self.config, || self.store.is_participant(conversation_id, user_id)).await? {
            return Err(AppError::NotAParticipant);
        }

        let message = super::retry::transient(&self.config, || self.messages.get(up_to_message_id))
            .await?
            .ok_or(AppError::NotFound)?;

        if message.conversation_id != conversation_id {
            return Err(AppError::BadRequest("Message does not belong to this conversation".into()));
        }

        let advanced = super::retry::transient(&self.config, || {
            self.store.mark_read(conversation_id, user_id, message.seq, message.id)
        })
        .await?;

        if advanced {
            self.metrics.mark_read_total.add(1, &[]);

            let conversation = super::retry::transient(&self.config, || self.store.get(conversation_id))
                .await?
                .ok_or(AppError::NotFound)?;

            // Read receipts interest every participant's conversation list,
            // not just the reader's.
            for participant in &conversation.participants {
                self.fanout.publish(
                    Channel::UserFeed(participant.user_id),
                    ChatEvent::ConversationUpdated { conversation: conversation.clone(), actor_id: user_id },
                );
            }
        }

        Ok(())
    }

    /// Total unread badge across all the user's conversations.
    ///
    /// # Errors
    /// Returns `AppError::StoreUnavailable` if the store stays unreachable.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(user_id = %user_id))]
    pub async fn unread_total(&self, user_id: Uuid) -> Result<i64> {
        super::retry::transient(&self.config, || self.store.unread_total(user_id)).await
    }

    /// Participant check shared with the gateway's subscribe path.
    ///
    /// # Errors
    /// Returns `AppError::StoreUnavailable` if the store stays unreachable.
    pub async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        super::retry::transient(&self.config, || self.store.is_participant(conversation_id, user_id)).await
    }
}
