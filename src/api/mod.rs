use crate::config::Config;
use crate::services::attachment_service::AttachmentService;
use crate::services::conversation_service::ConversationService;
use crate::services::fanout::FanoutService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::presence_service::PresenceService;
use crate::services::typing_service::TypingService;
use crate::storage::{DbPool, ObjectStore, StoreBundle};
use axum::body::Body;
use axum::http::Request;
use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};
use std::sync::Arc;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod attachments;
pub mod conversations;
pub mod gateway;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod schemas;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
    pub presence_service: PresenceService,
    pub typing_service: TypingService,
    pub attachment_service: AttachmentService,
    pub gateway_service: GatewayService,
    pub fanout: FanoutService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

#[derive(Clone, Debug)]
pub struct ServiceContainer {
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
    pub presence_service: PresenceService,
    pub typing_service: TypingService,
    pub attachment_service: AttachmentService,
    pub gateway_service: GatewayService,
    pub fanout: FanoutService,
    pub health_service: HealthService,
}

impl ServiceContainer {
    /// Wires every service over the given store backends. Shared between the
    /// production boot path (Postgres + S3) and the test harness (in-memory).
    #[must_use]
    pub fn build(
        config: &Config,
        stores: StoreBundle,
        objects: Arc<dyn ObjectStore>,
        pool: Option<DbPool>,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        let fanout = FanoutService::new(&config.fanout, shutdown_rx.clone());

        let conversation_service = ConversationService::new(
            Arc::clone(&stores.conversations),
            Arc::clone(&stores.messages),
            fanout.clone(),
            config.messaging.clone(),
        );

        let message_service = MessageService::new(
            Arc::clone(&stores.messages),
            Arc::clone(&stores.conversations),
            fanout.clone(),
            config.messaging.clone(),
        );

        let presence_service =
            PresenceService::new(Arc::clone(&stores.presence), fanout.clone(), &config.presence, shutdown_rx.clone());

        let typing_service = TypingService::new(fanout.clone(), &config.typing, shutdown_rx);

        let attachment_service = AttachmentService::new(
            Arc::clone(&stores.attachments),
            Arc::clone(&stores.messages),
            Arc::clone(&stores.conversations),
            Arc::clone(&objects),
            config.storage.clone(),
        );

        let gateway_service = GatewayService::new(
            fanout.clone(),
            presence_service.clone(),
            typing_service.clone(),
            conversation_service.clone(),
        );

        let health_service = HealthService::new(pool, objects, config.health.clone());

        Self {
            conversation_service,
            message_service,
            presence_service,
            typing_service,
            attachment_service,
            gateway_service,
            fanout,
            health_service,
        }
    }
}

/// Configures and returns the primary application router.
///
/// # Panics
/// Panics if the rate limiter configuration cannot be constructed.
pub fn app_router(
    config: Config,
    services: ServiceContainer,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Router {
    let interval_ns = 1_000_000_000 / config.rate_limit.per_second.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_nanosecond(u64::from(interval_ns))
            .burst_size(config.rate_limit.burst)
            .finish()
            .expect("Failed to build rate limiter config"),
    );

    let state = AppState {
        config,
        conversation_service: services.conversation_service,
        message_service: services.message_service,
        presence_service: services.presence_service,
        typing_service: services.typing_service,
        attachment_service: services.attachment_service,
        gateway_service: services.gateway_service,
        fanout: services.fanout,
        shutdown_rx,
    };

    let api_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::get_or_create_direct))
        .route("/conversations/{id}/read", post(conversations::mark_read))
        .route("/conversations/{id}/messages", post(messages::send_message))
        .route("/conversations/{id}/messages", get(messages::list_messages))
        .route("/messages/search", get(messages::search_messages))
        .route("/messages/{id}", patch(messages::edit_message))
        .route("/messages/{id}", delete(messages::delete_message))
        .route("/messages/{id}/reactions", put(messages::add_reaction))
        .route("/messages/{id}/reactions", delete(messages::remove_reaction))
        .route("/messages/{id}/report", post(messages::report_message))
        .route("/messages/{id}/attachment", post(attachments::upload_attachment))
        .route("/attachments/{id}", get(attachments::download_attachment))
        .route("/presence", put(presence::update_presence))
        .route("/presence/{userId}", get(presence::get_presence))
        .route("/unread", get(conversations::unread_total))
        .route("/gateway", get(gateway::websocket_handler))
        .layer(GovernorLayer::new(governor_conf));

    Router::new()
        .nest("/v1", api_routes)
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                        "user_id" = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                        let status = response.status();
                        tracing::Span::current().record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            middleware::MakeRequestUuidOrHeader,
        ))
        .with_state(state)
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
