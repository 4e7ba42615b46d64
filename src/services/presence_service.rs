use crate::config::PresenceConfig;
use crate::domain::event::{Channel, ChatEvent};
use crate::domain::presence::{Presence, PresenceStatus};
use crate::error::Result;
use crate::storage::PresenceStore;
use dashmap::DashMap;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    transitions_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confab-server");
        Self {
            transitions_total: meter
                .u64_counter("presence_transitions_total")
                .with_description("Total presence status transitions")
                .build(),
        }
    }
}

#[derive(Debug)]
struct PresenceRecord {
    status: PresenceStatus,
    last_seen_at: OffsetDateTime,
    active_conversation_id: Option<Uuid>,
    last_activity: Instant,
}

impl PresenceRecord {
    fn view(&self, user_id: Uuid) -> Presence {
        Presence {
            user_id,
            status: self.status,
            last_seen_at: self.last_seen_at,
            active_conversation_id: self.active_conversation_id,
        }
    }
}

/// Per-user presence with heartbeat-based liveness.
///
/// Live state is memory-only, last-write-wins, and never serialized against
/// message writes; only `last_seen` is written through for offline
/// reconstruction. The sweeper demotes `online -> away -> offline` as
/// heartbeats go silent, each transition broadcast on the presence channel.
#[derive(Clone, Debug)]
pub struct PresenceService {
    records: Arc<DashMap<Uuid, PresenceRecord>>,
    store: Arc<dyn PresenceStore>,
    fanout: super::fanout::FanoutService,
    away_after: Duration,
    offline_after: Duration,
    metrics: Metrics,
}

impl PresenceService {
    #[must_use]
    pub fn new(
        store: Arc<dyn PresenceStore>,
        fanout: super::fanout::FanoutService,
        config: &PresenceConfig,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        let service = Self {
            records: Arc::new(DashMap::new()),
            store,
            fanout,
            away_after: Duration::from_millis(config.away_after_ms),
            offline_after: Duration::from_millis(config.offline_after_ms),
            metrics: Metrics::new(),
        };

        let sweeper = service.clone();
        let sweep_interval = Duration::from_millis(config.sweep_interval_ms);
        tokio::spawn(
            async move {
                sweeper.run_sweeper(sweep_interval, shutdown).await;
            }
            .instrument(tracing::info_span!("presence_sweeper")),
        );

        service
    }

    /// Explicit status update from the client (visibility change, unload).
    pub async fn set_status(
        &self,
        user_id: Uuid,
        status: PresenceStatus,
        active_conversation_id: Option<Uuid>,
    ) -> Presence {
        let now = OffsetDateTime::now_utc();
        let changed;
        let presence;
        {
            let mut entry = self.records.entry(user_id).or_insert_with(|| PresenceRecord {
                status: PresenceStatus::Offline,
                last_seen_at: now,
                active_conversation_id: None,
                last_activity: Instant::now(),
            });

            changed = entry.status != status || entry.active_conversation_id != active_conversation_id;
            entry.status = status;
            entry.last_seen_at = now;
            entry.active_conversation_id = active_conversation_id;
            entry.last_activity = Instant::now();
            presence = entry.view(user_id);
        }

        // Best-effort: a missed last_seen write degrades offline
        // reconstruction, never live messaging.
        if let Err(e) = self.store.record_last_seen(user_id, now).await {
            tracing::warn!(error = %e, user_id = %user_id, "Failed to persist last_seen");
        }

        if changed {
            self.publish_change(&presence);
        }
        presence
    }

    /// Liveness signal. Promotes the user to online and refreshes the decay
    /// clock; only transitions hit the durable store.
    pub async fn heartbeat(&self, user_id: Uuid) {
        let now = OffsetDateTime::now_utc();
        let was;
        let presence;
        {
            let mut entry = self.records.entry(user_id).or_insert_with(|| PresenceRecord {
                status: PresenceStatus::Offline,
                last_seen_at: now,
                active_conversation_id: None,
                last_activity: Instant::now(),
            });

            was = entry.status;
            entry.status = PresenceStatus::Online;
            entry.last_seen_at = now;
            entry.last_activity = Instant::now();
            presence = entry.view(user_id);
        }

        if was != PresenceStatus::Online {
            if let Err(e) = self.store.record_last_seen(user_id, now).await {
                tracing::warn!(error = %e, user_id = %user_id, "Failed to persist last_seen");
            }
            self.publish_change(&presence);
        }
    }

    /// `None` means the user has never been seen; callers must treat that
    /// distinctly from a reconstructed `offline` record.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the last-seen lookup fails.
    pub async fn get_presence(&self, user_id: Uuid) -> Result<Option<Presence>> {
        if let Some(record) = self.records.get(&user_id) {
            return Ok(Some(record.view(user_id)));
        }

        Ok(self.store.fetch_last_seen(user_id).await?.map(|last_seen_at| Presence {
            user_id,
            status: PresenceStatus::Offline,
            last_seen_at,
            active_conversation_id: None,
        }))
    }

    fn publish_change(&self, presence: &Presence) {
        self.metrics.transitions_total.add(1, &[KeyValue::new("status", presence.status.as_str())]);
        self.fanout.publish(Channel::Presence, ChatEvent::PresenceChanged { presence: presence.clone() });
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut demoted = Vec::new();

        for mut entry in self.records.iter_mut() {
            let age = now.duration_since(entry.last_activity);
            let next = match entry.status {
                PresenceStatus::Online if age >= self.offline_after => Some(PresenceStatus::Offline),
                PresenceStatus::Online if age >= self.away_after => Some(PresenceStatus::Away),
                PresenceStatus::Away if age >= self.offline_after => Some(PresenceStatus::Offline),
                _ => None,
            };

            if let Some(status) = next {
                entry.status = status;
                let user_id = *entry.key();
                demoted.push((entry.view(user_id), status == PresenceStatus::Offline));
            }
        }

        for (presence, went_offline) in demoted {
            if went_offline
                && let Err(e) = self.store.record_last_seen(presence.user_id, presence.last_seen_at).await
            {
                tracing::warn!(error = %e, user_id = %presence.user_id, "Failed to persist last_seen");
            }
            self.publish_change(&presence);
        }
    }

    async fn run_sweeper(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.changed() => break,
            }
        }
    }
}
