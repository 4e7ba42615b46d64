use crate::config::TypingConfig;
use crate::domain::event::{Channel, ChatEvent};
use crate::domain::typing::TypingState;
use dashmap::DashMap;
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    started_total: Counter<u64>,
    expired_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confab-server");
        Self {
            started_total: meter
                .u64_counter("typing_started_total")
                .with_description("Total typing indicators started")
                .build(),
            expired_total: meter
                .u64_counter("typing_expired_total")
                .with_description("Typing indicators removed by expiry rather than an explicit stop")
                .build(),
        }
    }
}

/// Ephemeral per-conversation set of "currently typing" users.
///
/// Holds no durable state; losing the whole set on restart only costs a few
/// seconds of indicator accuracy. `typing.changed{true}` fires on the first
/// insert only, never on refreshes, and exactly one `typing.changed{false}`
/// follows via explicit stop, expiry sweep or session teardown.
#[derive(Clone, Debug)]
pub struct TypingService {
    entries: Arc<DashMap<(Uuid, Uuid), Instant>>,
    fanout: super::fanout::FanoutService,
    ttl: Duration,
    metrics: Metrics,
}

impl TypingService {
    #[must_use]
    pub fn new(
        fanout: super::fanout::FanoutService,
        config: &TypingConfig,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        let service = Self {
            entries: Arc::new(DashMap::new()),
            fanout,
            ttl: Duration::from_millis(config.ttl_ms),
            metrics: Metrics::new(),
        };

        let sweeper = service.clone();
        let sweep_interval = Duration::from_millis(config.sweep_interval_ms);
        tokio::spawn(
            async move {
                sweeper.run_sweeper(sweep_interval, shutdown).await;
            }
            .instrument(tracing::info_span!("typing_sweeper")),
        );

        service
    }

    pub fn start_typing(&self, conversation_id: Uuid, user_id: Uuid) {
        let fresh = self.entries.insert((conversation_id, user_id), Instant::now() + self.ttl).is_none();

        if fresh {
            self.metrics.started_total.add(1, &[]);
            self.fanout.publish(
                Channel::Conversation(conversation_id),
                ChatEvent::TypingChanged { conversation_id, user_id, typing: true },
            );
        }
    }

    pub fn stop_typing(&self, conversation_id: Uuid, user_id: Uuid) {
        if self.entries.remove(&(conversation_id, user_id)).is_some() {
            self.fanout.publish(
                Channel::Conversation(conversation_id),
                ChatEvent::TypingChanged { conversation_id, user_id, typing: false },
            );
        }
    }

    /// Drops every entry the user holds, emitting the matching stop events.
    /// Called on session teardown so indicators never outlive a connection.
    pub fn clear_user(&self, user_id: Uuid) {
        let mut cleared = Vec::new();
        self.entries.retain(|(conversation_id, entry_user), _| {
            if *entry_user == user_id {
                cleared.push(*conversation_id);
                false
            } else {
                true
            }
        });

        for conversation_id in cleared {
            self.fanout.publish(
                Channel::Conversation(conversation_id),
                ChatEvent::TypingChanged { conversation_id, user_id, typing: false },
            );
        }
    }

    /// Currently-typing users, with lazy expiry on read.
    #[must_use]
    pub fn typists(&self, conversation_id: Uuid) -> Vec<TypingState> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == conversation_id)
            .map(|entry| TypingState {
                conversation_id,
                user_id: entry.key().1,
                expires_at: *entry.value(),
            })
            .filter(|state| !state.is_expired_at(now))
            .collect()
    }

    fn sweep(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.retain(|key, expires_at| {
            if *expires_at <= now {
                expired.push(*key);
                false
            } else {
                true
            }
        });

        for (conversation_id, user_id) in expired {
            self.metrics.expired_total.add(1, &[]);
            self.fanout.publish(
                Channel::Conversation(conversation_id),
                ChatEvent::TypingChanged { conversation_id, user_id, typing: false },
            );
        }
    }

    async fn run_sweeper(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = shutdown.changed() => break,
            }
        }
    }
}
