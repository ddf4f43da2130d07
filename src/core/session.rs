//! Chat session and message records.
//!
//! Sessions own their messages; messages are totally ordered by `seq`
//! within a session. Only `user` and `assistant` roles are persisted —
//! system and tool content exist only inside assembled prompts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ts;

/// Role of a persisted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message written by the user.
    User,
    /// Message produced by the model.
    Assistant,
}

impl Role {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    /// UUID of the session.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Title, derived from the first user message (≤ 40 code points).
    pub title: String,
    /// Unix timestamp when the session was created.
    pub created_at: i64,
    /// Unix timestamp of the last message.
    pub updated_at: i64,
}

impl ChatSession {
    /// Creates a fresh session for the user with a title derived from the
    /// first message.
    #[must_use]
    pub fn new(user_id: &str, first_message: &str) -> Self {
        let now = now_ts();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: derive_title(first_message),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derives a session title from the first user message.
///
/// Truncated to 40 code points, preferring a whitespace boundary within
/// the window so Latin text is not cut mid-word.
#[must_use]
pub fn derive_title(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return "新对话".to_string();
    }

    let mut end = trimmed.len();
    for (count, (idx, _)) in trimmed.char_indices().enumerate() {
        if count == 40 {
            end = idx;
            break;
        }
    }
    if end == trimmed.len() {
        return trimmed.to_string();
    }

    let window = &trimmed[..end];
    // Prefer breaking at the last whitespace inside the window, if the
    // tail after it is short enough to matter.
    let cut = window
        .rfind(char::is_whitespace)
        .filter(|&pos| pos > end / 2)
        .unwrap_or(end);
    window[..cut].trim_end().to_string()
}

/// Per-message metadata: model used, retrieval sources, token usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Model that produced an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Retrieval sources cited by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,

    /// Token usage reported by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,

    /// Wall-clock generation duration, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Set when the stream was cancelled and the content is partial.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

/// Reference to a retrieved source attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Title of the source document.
    pub title: String,
    /// Normalized article number, when the segment is an article.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_number: Option<String>,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,
    /// Owning session.
    pub session_id: String,
    /// Message role.
    pub role: Role,
    /// Message content.
    pub content: String,
    /// Message metadata.
    pub metadata: MessageMetadata,
    /// Unix timestamp when the message was created.
    pub created_at: i64,
    /// Monotonic sequence number within the session (assigned by the store).
    pub seq: i64,
}

impl ChatMessage {
    /// Creates a user message for the session.
    #[must_use]
    pub fn user(session_id: &str, content: &str) -> Self {
        Self {
            id: None,
            session_id: session_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            metadata: MessageMetadata::default(),
            created_at: now_ts(),
            seq: 0,
        }
    }

    /// Creates an assistant message with metadata.
    #[must_use]
    pub fn assistant(session_id: &str, content: &str, metadata: MessageMetadata) -> Self {
        Self {
            id: None,
            session_id: session_id.to_string(),
            role: Role::Assistant,
            content: content.to_string(),
            metadata,
            created_at: now_ts(),
            seq: 0,
        }
    }
}
