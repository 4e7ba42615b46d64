pub(crate) mod session;

use crate::services::conversation_service::ConversationService;
use crate::services::fanout::FanoutService;
use crate::services::gateway::session::Session;
use crate::services::presence_service::PresenceService;
use crate::services::typing_service::TypingService;
use axum::extract::ws::WebSocket;
use dashmap::DashMap;
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) active_connections: UpDownCounter<i64>,
    pub(crate) frames_dropped_total: Counter<u64>,
    pub(crate) events_delivered_total: Counter<u64>,
    pub(crate) events_suppressed_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    fn new() -> Self {
        let meter = global::meter("confab-server");
        Self {
            active_connections: meter
                .i64_up_down_counter("websocket_active_connections")
                .with_description("Number of active WebSocket connections")
                .build(),
            frames_dropped_total: meter
                .u64_counter("websocket_frames_dropped_total")
                .with_description("Inbound frames dropped as malformed or unexpected")
                .build(),
            events_delivered_total: meter
                .u64_counter("websocket_events_delivered_total")
                .with_description("Fan-out events delivered to clients")
                .build(),
            events_suppressed_total: meter
                .u64_counter("websocket_events_suppressed_total")
                .with_description("Fan-out events dropped by echo suppression")
                .build(),
        }
    }
}

/// Owns the client sessions: one task per connected socket, each holding its
/// channel subscriptions. Teardown releases every subscription the session
/// registered and clears the user's typing entries.
#[derive(Clone, Debug)]
pub struct GatewayService {
    fanout: FanoutService,
    presence: PresenceService,
    typing: TypingService,
    conversations: ConversationService,
    connections: Arc<DashMap<Uuid, usize>>,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        fanout: FanoutService,
        presence: PresenceService,
        typing: TypingService,
        conversations: ConversationService,
    ) -> Self {
        Self { fanout, presence, typing, conversations, connections: Arc::new(DashMap::new()), metrics: Metrics::new() }
    }

    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        user_id: Uuid,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        self.metrics.active_connections.add(1, &[]);
        *self.connections.entry(user_id).or_insert(0) += 1;

        // Connecting is itself a liveness signal.
        self.presence.heartbeat(user_id).await;

        let session = Session {
            user_id,
            request_id,
            socket,
            fanout: self.fanout.clone(),
            presence: self.presence.clone(),
            typing: self.typing.clone(),
            conversations: self.conversations.clone(),
            metrics: self.metrics.clone(),
            shutdown_rx,
        };

        session.run().await;

        let remaining = {
            let mut entry = self.connections.entry(user_id).or_insert(1);
            *entry = entry.saturating_sub(1);
            *entry
        };
        if remaining == 0 {
            self.connections.remove(&user_id);
            // The last session is gone: indicators must not outlive it.
            // Presence is left to decay through the tracker's silence windows.
            self.typing.clear_user(user_id);
        }

        self.metrics.active_connections.add(-1, &[]);
    }
}
