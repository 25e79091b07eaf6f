use serde::{Deserialize, Serialize};

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_SYSTEM: &str = "system";

pub const CONTENT_TYPE_TEXT: &str = "text";

/// Title given to a conversation before the first synthesis pass.
pub const DEFAULT_TITLE: &str = "New";

/// A persisted conversation. Exists iff a row with this uuid exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque external identifier, immutable.
    pub uuid: String,
    /// Owner, immutable after creation.
    pub user_id: String,
    /// Short human string; starts as `"New"`, mutated by title synthesis
    /// or an explicit rename.
    pub title: String,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds. Advances on message insertion, title change, or
    /// summary insertion.
    pub updated_at: i64,
}

/// A persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Dense 64-bit id, globally unique within the process lifetime.
    pub id: i64,
    pub conversation_id: String,
    /// Per-conversation monotonic sequence, contiguous except where
    /// summarisation replaced a prefix.
    pub sequence: i64,
    pub role: String,
    pub content_type: String,
    pub content: String,
    pub meta: Option<String>,
    /// True when this row condenses one or more earlier rows.
    pub is_summary: bool,
    /// Epoch seconds.
    pub created_at: i64,
}

/// Caller-supplied fields for a new message row.
#[derive(Debug, Clone, Default)]
pub struct MessageInput {
    /// Defaults to `"user"` when empty.
    pub role: String,
    /// Defaults to `"text"` when empty.
    pub content_type: String,
    pub content: String,
    pub meta: String,
    pub is_summary: bool,
}

/// One entry of a prompt window sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}
