use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::Instrument;

/// Byte stream handed to and returned by the object store.
pub type ObjectStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Capability for attachment bytes. Rows referencing these objects live in
/// the relational store; this store only ever sees opaque keys.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Stores the object under `key`, consuming the stream. A stream error
    /// aborts the upload and must not leave a readable partial object.
    async fn put(&self, key: &str, content_len: Option<usize>, body: ObjectStream) -> Result<()>;

    /// Returns the object's length and a stream of its bytes.
    async fn get(&self, key: &str) -> Result<(u64, ObjectStream)>;

    /// Connectivity probe for the readiness endpoint.
    async fn check(&self) -> std::result::Result<(), String>;
}

type BridgeReceiver = mpsc::Receiver<std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync + 'static>>>;

// Wrapper to satisfy the S3 SDK's Sync requirement for Body
struct SyncBody {
    rx: Arc<Mutex<BridgeReceiver>>,
}

impl http_body::Body for SyncBody {
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let Ok(mut rx) = self.rx.lock() else {
            return Poll::Ready(Some(Err(Box::new(std::io::Error::other("receiver mutex poisoned")))));
        };

        match rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(bytes))) => Poll::Ready(Some(Ok(http_body::Frame::data(bytes)))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds the S3 client from config, honoring custom endpoints and static
    /// credentials for MinIO-style deployments.
    pub async fn new(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader =
                loader.credentials_provider(Credentials::new(access_key, secret_key, None, None, "confab-static"));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self { client: Client::from_conf(builder.build()), bucket: config.bucket.clone() }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, content_len: Option<usize>, mut body: ObjectStream) -> Result<()> {
        // Bridge the inbound stream into a Sync body for the S3 SDK.
        let (tx, rx) = mpsc::channel(2);

        tokio::spawn(
            async move {
                while let Some(item) = body.next().await {
                    match item {
                        Ok(bytes) => {
                            if tx.send(Ok(bytes)).await.is_err() {
                                tracing::debug!("Upload stream closed by receiver");
                                break;
                            }
                        }
                        Err(e) => {
                            let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
                            let _ = tx.send(Err(boxed)).await;
                            break;
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("object_stream_bridge")),
        );

        let sync_body = SyncBody { rx: Arc::new(Mutex::new(rx)) };
        let byte_stream = ByteStream::from_body_1_x(sync_body);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_length(content_len.map(|l| i64::try_from(l).unwrap_or(i64::MAX)))
            .body(byte_stream)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, key = %key, "S3 upload failed");
                AppError::UploadFailed
            })?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<(u64, ObjectStream)> {
        let output = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            tracing::error!(error = ?e, key = %key, "S3 download failed");
            AppError::NotFound
        })?;

        let content_length = output.content_length.unwrap_or(0);
        let reader = output.body.into_async_read();
        let stream = tokio_util::io::ReaderStream::new(reader).boxed();

        Ok((u64::try_from(content_length).unwrap_or(0), stream))
    }

    async fn check(&self) -> std::result::Result<(), String> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| format!("Storage connection failed for bucket {}: {e:?}", self.bucket))
    }
}

/// In-memory object store for the hermetic test suite.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, _content_len: Option<usize>, mut body: ObjectStream) -> Result<()> {
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::debug!(error = %e, key = %key, "Upload stream aborted");
                AppError::UploadFailed
            })?;
            buffer.extend_from_slice(&chunk);
        }

        self.objects.write().await.insert(key.to_string(), Bytes::from(buffer));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<(u64, ObjectStream)> {
        let bytes = self.objects.read().await.get(key).cloned().ok_or(AppError::NotFound)?;
        let len = bytes.len() as u64;
        Ok((len, futures::stream::once(async move { Ok(bytes) }).boxed()))
    }

    async fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}
