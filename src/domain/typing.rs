use uuid::Uuid;

/// An ephemeral "currently typing" entry. Never persisted; the coordinator
/// drops the whole set on restart without correctness impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingState {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: tokio::time::Instant,
}

impl TypingState {
    #[must_use]
    pub fn is_expired_at(&self, now: tokio::time::Instant) -> bool {
        self.expires_at <= now
    }
}
