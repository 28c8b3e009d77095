/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Channels use the `-100` prefixed form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Channel-scoped message id. Strictly increasing within a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub i32);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of attached media, as far as re-sending needs to know.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    Animation,
    Document,
}

/// Provider handle for a media payload. Only valid for the current run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
    pub file_name: Option<String>,
}

/// What a source message carries. Each variant has exactly one transfer path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// Provider-generated (joins, pins, title changes). Never reproduced.
    Service,
    Text(String),
    Media {
        media: MediaRef,
        caption: Option<String>,
    },
    /// Nothing reproducible (e.g. an unsupported payload without text).
    Empty,
    /// Exists but the provider refuses to expose its content (protected
    /// content, or a service message it cannot tell apart). Reported as a
    /// failure, never recorded.
    Unavailable(String),
}

/// Read-only view of one message in the source channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceMessage {
    pub id: MessageId,
    pub body: MessageBody,
}

impl SourceMessage {
    pub fn text(id: i32, text: &str) -> Self {
        Self {
            id: MessageId(id),
            body: MessageBody::Text(text.to_string()),
        }
    }

    pub fn service(id: i32) -> Self {
        Self {
            id: MessageId(id),
            body: MessageBody::Service,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self.body, MessageBody::Service)
    }
}

/// Normalize a channel id to the `-100` prefixed form the Bot API expects.
///
/// `12345` and `-12345` become `-10012345`; already-prefixed ids are unchanged.
pub fn normalize_channel_id(raw: i64) -> ChatId {
    let digits = raw.unsigned_abs().to_string();
    if raw < 0 && digits.starts_with("100") && digits.len() > 3 {
        return ChatId(raw);
    }
    let prefixed = format!("-100{digits}");
    ChatId(prefixed.parse::<i64>().unwrap_or(raw))
}
