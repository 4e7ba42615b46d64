use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::Arc;

pub mod attachment_repo;
pub mod conversation_repo;
pub mod memory;
pub mod message_repo;
pub mod object_store;
pub mod presence_repo;
pub mod records;

pub use attachment_repo::AttachmentStore;
pub use conversation_repo::ConversationStore;
pub use message_repo::{MessageStore, NewMessage};
pub use object_store::{ObjectStore, ObjectStream};
pub use presence_repo::PresenceStore;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(20).connect(database_url).await
}

/// The durable-store capability handed to the service layer. Both backends
/// implement identical semantics; the in-memory one backs the hermetic tests.
#[derive(Debug, Clone)]
pub struct StoreBundle {
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub attachments: Arc<dyn AttachmentStore>,
}

impl StoreBundle {
    #[must_use]
    pub fn postgres(pool: DbPool) -> Self {
        Self {
            conversations: Arc::new(conversation_repo::PgConversationRepository::new(pool.clone())),
            messages: Arc::new(message_repo::PgMessageRepository::new(pool.clone())),
            presence: Arc::new(presence_repo::PgPresenceRepository::new(pool.clone())),
            attachments: Arc::new(attachment_repo::PgAttachmentRepository::new(pool)),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::default());
        Self {
            conversations: Arc::clone(&store) as Arc<dyn ConversationStore>,
            messages: Arc::clone(&store) as Arc<dyn MessageStore>,
            presence: Arc::clone(&store) as Arc<dyn PresenceStore>,
            attachments: store as Arc<dyn AttachmentStore>,
        }
    }
}
