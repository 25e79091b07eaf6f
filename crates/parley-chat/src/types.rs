use serde::{Deserialize, Serialize};

pub use parley_llm::ModelInfo;

/// One message on the RPC wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub meta: String,
}

/// Streaming turn request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationReq {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub message: Message,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationResp {
    pub conversation_id: String,
    pub title: String,
    pub reply: Message,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListConversationsReq {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    pub conversation_id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListConversationsResp {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub items: Vec<ConversationItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMessagesReq {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageItem {
    pub id: i64,
    pub sequence: i64,
    pub role: String,
    pub content_type: String,
    pub content: String,
    pub meta: String,
    pub is_summary: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListMessagesResp {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub items: Vec<MessageItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelListResp {
    pub data: Vec<ModelInfo>,
}

/// Discriminator for client-visible stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEventType {
    #[serde(rename = "unspecified")]
    Unspecified,
    #[serde(rename = "text.delta")]
    TextDelta,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error,
}

/// One event of the server-streaming reply.
///
/// `delta` carries the token fragment for `TextDelta` and the diagnostic for
/// `Error`. `conversation_id` and `title` are populated on terminal events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    #[serde(default)]
    pub delta: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub title: String,
}

impl StreamEvent {
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self {
            event_type: StreamEventType::TextDelta,
            delta: delta.into(),
            conversation_id: String::new(),
            title: String::new(),
        }
    }

    pub fn done(conversation_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            event_type: StreamEventType::Done,
            delta: String::new(),
            conversation_id: conversation_id.into(),
            title: title.into(),
        }
    }

    pub fn error(
        message: impl Into<String>,
        conversation_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            event_type: StreamEventType::Error,
            delta: message.into(),
            conversation_id: conversation_id.into(),
            title: title.into(),
        }
    }
}
