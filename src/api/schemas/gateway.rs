use crate::domain::event::ChatEvent;
use crate::domain::presence::PresenceStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames a client may send over the gateway socket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Registers interest in a conversation's event channel.
    Subscribe {
        conversation_id: Uuid,
        /// When set, events this session's own user produced are not echoed
        /// back on this channel.
        #[serde(default)]
        suppress_echo: bool,
    },
    Unsubscribe {
        conversation_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
    },
    TypingStop {
        conversation_id: Uuid,
    },
    Presence {
        status: PresenceStatus,
        #[serde(default)]
        active_conversation_id: Option<Uuid>,
    },
    Heartbeat,
}

/// Frames the gateway sends to the client: either a fan-out event or a
/// session control frame. Both serialize flat with a distinguishing `type`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(ChatEvent),
    Control(ControlFrame),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Subscribed {
        conversation_id: Uuid,
        /// Users typing at subscribe time, so the client starts consistent.
        typing_user_ids: Vec<Uuid>,
    },
    Unsubscribed {
        conversation_id: Uuid,
    },
    /// This subscriber fell behind and must backfill via the message list.
    Lagged {
        channel: String,
        missed: u64,
    },
    Error {
        message: String,
    },
}
