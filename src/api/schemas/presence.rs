use crate::domain::presence::PresenceStatus;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UpdatePresenceRequest {
    pub status: PresenceStatus,
    #[serde(default)]
    pub active_conversation_id: Option<Uuid>,
}
