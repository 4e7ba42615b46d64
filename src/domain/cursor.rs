use crate::error::{AppError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Opaque pagination cursor over the per-conversation message sequence.
///
/// Encoding the seq (rather than a timestamp) keeps pages stable under
/// concurrent inserts: new messages only ever get larger sequence numbers,
/// so a page boundary never shifts underneath a paginating client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub before_seq: i64,
}

impl Cursor {
    #[must_use]
    pub fn encode(self) -> String {
        URL_SAFE_NO_PAD.encode(format!("s:{}", self.before_seq))
    }

    /// Decodes a client-supplied cursor.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if the cursor is malformed.
    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| AppError::BadRequest("Invalid cursor".into()))?;
        let text = String::from_utf8(bytes).map_err(|_| AppError::BadRequest("Invalid cursor".into()))?;
        let seq = text
            .strip_prefix("s:")
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| AppError::BadRequest("Invalid cursor".into()))?;
        Ok(Self { before_seq: seq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = Cursor { before_seq: 4217 };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(matches!(Cursor::decode("not-base64!!"), Err(AppError::BadRequest(_))));
        let bogus = URL_SAFE_NO_PAD.encode("t:123");
        assert!(matches!(Cursor::decode(&bogus), Err(AppError::BadRequest(_))));
    }
}
