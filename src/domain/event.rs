use crate::domain::conversation::Conversation;
use crate::domain::message::{Message, ReactionKind};
use crate::domain::presence::Presence;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical fan-out channel key. One channel per open conversation view, one
/// per user's conversation list, and a single broadcast for presence (any
/// contact may be watching a user's status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Conversation(Uuid),
    UserFeed(Uuid),
    Presence,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::UserFeed(id) => write!(f, "user:{id}:conversations"),
            Self::Presence => write!(f, "presence"),
        }
    }
}

/// Events pushed through the fan-out engine. Every variant carries exactly the
/// data that event needs; `correlation_id` echoes the client-generated id of
/// the originating request so optimistic clients can reconcile speculative
/// state against the authoritative event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "message.new")]
    MessageNew {
        conversation_id: Uuid,
        message: Message,
        correlation_id: Option<Uuid>,
    },

    #[serde(rename = "message.edited")]
    MessageEdited {
        conversation_id: Uuid,
        message: Message,
        correlation_id: Option<Uuid>,
    },

    #[serde(rename = "message.deleted")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        seq: i64,
        actor_id: Uuid,
        correlation_id: Option<Uuid>,
    },

    #[serde(rename = "reaction.changed")]
    ReactionChanged {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        added: bool,
        correlation_id: Option<Uuid>,
    },

    #[serde(rename = "conversation.updated")]
    ConversationUpdated {
        conversation: Conversation,
        actor_id: Uuid,
    },

    #[serde(rename = "presence.changed")]
    PresenceChanged { presence: Presence },

    #[serde(rename = "typing.changed")]
    TypingChanged {
        conversation_id: Uuid,
        user_id: Uuid,
        typing: bool,
    },
}

impl ChatEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message.new",
            Self::MessageEdited { .. } => "message.edited",
            Self::MessageDeleted { .. } => "message.deleted",
            Self::ReactionChanged { .. } => "reaction.changed",
            Self::ConversationUpdated { .. } => "conversation.updated",
            Self::PresenceChanged { .. } => "presence.changed",
            Self::TypingChanged { .. } => "typing.changed",
        }
    }

    /// The user whose action produced this event, used for echo suppression.
    #[must_use]
    pub fn actor(&self) -> Option<Uuid> {
        match self {
            Self::MessageNew { message, .. } | Self::MessageEdited { message, .. } => Some(message.sender_id),
            Self::MessageDeleted { actor_id, .. } | Self::ConversationUpdated { actor_id, .. } => Some(*actor_id),
            Self::ReactionChanged { user_id, .. } | Self::TypingChanged { user_id, .. } => Some(*user_id),
            Self::PresenceChanged { presence } => Some(presence.user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = ChatEvent::TypingChanged {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            typing: true,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["typing"], true);
    }

    #[test]
    fn test_channel_display_is_stable() {
        let id = Uuid::nil();
        assert_eq!(Channel::Conversation(id).to_string(), format!("conversation:{id}"));
        assert_eq!(Channel::UserFeed(id).to_string(), format!("user:{id}:conversations"));
        assert_eq!(Channel::Presence.to_string(), "presence");
    }
}
