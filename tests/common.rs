#![allow(dead_code)]

use confab_server::api::{ServiceContainer, app_router};
use confab_server::config::{
    AuthConfig, Config, FanoutConfig, HealthConfig, LogFormat, MessagingConfig, PresenceConfig, RateLimitConfig,
    ServerConfig, StorageConfig, TelemetryConfig, TypingConfig,
};
use confab_server::domain::identity::Claims;
use confab_server::storage::object_store::MemoryObjectStore;
use confab_server::storage::{ObjectStore, StoreBundle};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("confab_server=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

pub fn get_test_config() -> Config {
    Config {
        database_url: "postgres://unused-in-memory".to_string(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            mgmt_port: 0,
            shutdown_timeout_secs: 1,
        },
        auth: AuthConfig { jwt_secret: "test_secret".to_string() },
        rate_limit: RateLimitConfig { per_second: 10_000, burst: 10_000 },
        messaging: MessagingConfig {
            page_size_default: 50,
            page_size_max: 100,
            max_content_len: 4096,
            search_limit: 50,
            direct_retry_attempts: 3,
            direct_retry_min_delay_ms: 5,
            store_retry_attempts: 2,
            store_retry_min_delay_ms: 5,
        },
        presence: PresenceConfig { away_after_ms: 30_000, offline_after_ms: 300_000, sweep_interval_ms: 50 },
        typing: TypingConfig { ttl_ms: 300, sweep_interval_ms: 50 },
        fanout: FanoutConfig { channel_capacity: 64, gc_interval_secs: 3600 },
        storage: StorageConfig {
            bucket: "confab-test".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            force_path_style: false,
            attachment_max_size_bytes: 1_048_576,
            progress_step_pct: 5,
        },
        health: HealthConfig { db_timeout_ms: 500, storage_timeout_ms: 500 },
        telemetry: TelemetryConfig { otlp_endpoint: None, log_format: LogFormat::Text },
    }
}

pub struct TestApp {
    pub server_url: String,
    pub ws_url: String,
    pub client: reqwest::Client,
    pub config: Config,
    pub services: ServiceContainer,
    pub stores: StoreBundle,
    pub objects: Arc<dyn ObjectStore>,
    shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(get_test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        setup_tracing();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stores = StoreBundle::in_memory();
        let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::default());

        let services = ServiceContainer::build(
            &config,
            stores.clone(),
            Arc::clone(&objects),
            None,
            shutdown_rx.clone(),
        );

        let router = app_router(config.clone(), services.clone(), shutdown_rx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let server = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|&s| s).await;
                });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Test server error");
            }
        });

        Self {
            server_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/v1/gateway"),
            client: reqwest::Client::new(),
            config,
            services,
            stores,
            objects,
            shutdown_tx,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        Claims::new(user_id, 3600).encode(&self.config.auth.jwt_secret).expect("encode test token")
    }

    pub async fn create_direct(&self, token: &str, other: Uuid) -> serde_json::Value {
        let resp = self
            .client
            .post(format!("{}/v1/conversations/direct", self.server_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "user_id": other }))
            .send()
            .await
            .expect("create direct");
        assert!(resp.status().is_success(), "create_direct failed: {}", resp.status());
        resp.json().await.expect("direct conversation json")
    }

    pub async fn send_message(&self, token: &str, conversation_id: &str, content: &str) -> serde_json::Value {
        let resp = self
            .client
            .post(format!("{}/v1/conversations/{conversation_id}/messages", self.server_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .expect("send message");
        assert_eq!(resp.status(), 201, "send_message failed");
        resp.json().await.expect("message json")
    }

    pub async fn list_messages(&self, token: &str, conversation_id: &str, cursor: Option<&str>) -> serde_json::Value {
        let mut url = format!("{}/v1/conversations/{conversation_id}/messages", self.server_url);
        if let Some(cursor) = cursor {
            url = format!("{url}?cursor={cursor}");
        }
        let resp = self.client.get(url).bearer_auth(token).send().await.expect("list messages");
        assert!(resp.status().is_success(), "list_messages failed: {}", resp.status());
        resp.json().await.expect("page json")
    }

    pub async fn mark_read(&self, token: &str, conversation_id: &str, up_to: &str) -> reqwest::StatusCode {
        self.client
            .post(format!("{}/v1/conversations/{conversation_id}/read", self.server_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "up_to_message_id": up_to }))
            .send()
            .await
            .expect("mark read")
            .status()
    }

    pub async fn connect_ws(&self, token: &str) -> WsClient {
        let (stream, _resp) =
            connect_async(format!("{}?token={token}", self.ws_url)).await.expect("ws connect");
        WsClient { stream }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct WsClient {
    pub stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.stream.send(WsMessage::Text(value.to_string().into())).await.expect("ws send");
    }

    /// Next text frame parsed as JSON, or `None` on timeout/close.
    pub async fn next_json(&mut self, wait: Duration) -> Option<serde_json::Value> {
        loop {
            let msg = tokio::time::timeout(wait, self.stream.next()).await.ok()??;
            match msg {
                Ok(WsMessage::Text(text)) => {
                    return serde_json::from_str(text.as_str()).ok();
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Waits for a frame of the given type, skipping unrelated ones.
    pub async fn expect_frame(&mut self, frame_type: &str) -> serde_json::Value {
        for _ in 0..25 {
            if let Some(value) = self.next_json(Duration::from_secs(2)).await {
                if value["type"] == frame_type {
                    return value;
                }
                continue;
            }
            break;
        }
        panic!("Did not receive frame of type {frame_type}");
    }

    /// Asserts no frame of the given type arrives within the window.
    pub async fn expect_no_frame(&mut self, frame_type: &str, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        while tokio::time::Instant::now() < deadline {
            if let Some(value) = self.next_json(Duration::from_millis(50)).await {
                assert_ne!(value["type"], frame_type, "Unexpected {frame_type} frame: {value}");
            }
        }
    }

    pub async fn subscribe(&mut self, conversation_id: &str, suppress_echo: bool) {
        self.send_json(serde_json::json!({
            "type": "subscribe",
            "conversation_id": conversation_id,
            "suppress_echo": suppress_echo,
        }))
        .await;
        let ack = self.expect_frame("subscribed").await;
        assert_eq!(ack["conversation_id"], conversation_id);
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
