use thiserror::Error;

use parley_llm::LlmError;
use parley_memory::MemoryError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("conversation not found: {conversation_id}")]
    NotFound { conversation_id: String },

    #[error("forbidden")]
    Forbidden,

    #[error("conversation already exists: {conversation_id}")]
    Conflict { conversation_id: String },

    /// Upstream LLM failure. `status` is 0 for transport-level errors.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Short error code string for wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ChatError::NotFound { .. } => "NOT_FOUND",
            ChatError::Forbidden => "FORBIDDEN",
            ChatError::Conflict { .. } => "CONFLICT",
            ChatError::Upstream { .. } => "UPSTREAM_ERROR",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<MemoryError> for ChatError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::NotFound { conversation_id } => ChatError::NotFound { conversation_id },
            MemoryError::Forbidden { .. } => ChatError::Forbidden,
            MemoryError::Conflict { conversation_id } => ChatError::Conflict { conversation_id },
            MemoryError::Summarize(message) => ChatError::Upstream { status: 0, message },
            MemoryError::Database(e) => ChatError::Internal(e.to_string()),
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Api { status, message } => ChatError::Upstream { status, message },
            LlmError::Http(e) => ChatError::Upstream {
                status: 0,
                message: e.to_string(),
            },
            LlmError::Parse(message) => ChatError::Upstream { status: 0, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
