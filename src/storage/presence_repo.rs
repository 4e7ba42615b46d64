use crate::error::Result;
use crate::storage::DbPool;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Durable `last_seen` record backing offline presence reconstruction.
/// Live presence itself is in-memory only.
#[async_trait]
pub trait PresenceStore: Send + Sync + std::fmt::Debug {
    async fn record_last_seen(&self, user_id: Uuid, at: OffsetDateTime) -> Result<()>;

    async fn fetch_last_seen(&self, user_id: Uuid) -> Result<Option<OffsetDateTime>>;
}

#[derive(Debug, Clone)]
pub struct PgPresenceRepository {
    pool: DbPool,
}

impl PgPresenceRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PresenceStore for PgPresenceRepository {
    async fn record_last_seen(&self, user_id: Uuid, at: OffsetDateTime) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO presence_last_seen (user_id, last_seen_at, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET last_seen_at = $2, updated_at = NOW()
            ",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_last_seen(&self, user_id: Uuid) -> Result<Option<OffsetDateTime>> {
        let row: Option<(OffsetDateTime,)> =
            sqlx::query_as("SELECT last_seen_at FROM presence_last_seen WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(at,)| at))
    }
}
