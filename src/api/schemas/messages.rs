use crate::domain::message::{Message, MessageType, ReactionKind, ReportReason};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub reply_to_message_id: Option<Uuid>,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub price_cents: Option<i64>,
    /// Client-generated id echoed in the resulting event so optimistic UIs
    /// can reconcile their speculative state.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

const fn default_message_type() -> MessageType {
    MessageType::Text
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageRequest {
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub kind: ReactionKind,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReportMessageRequest {
    pub reason: ReportReason,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesParams {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MessagePageResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub messages: Vec<Message>,
}
