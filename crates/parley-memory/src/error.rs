use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("conversation not found: {conversation_id}")]
    NotFound { conversation_id: String },

    #[error("conversation {conversation_id} does not belong to the caller")]
    Forbidden { conversation_id: String },

    #[error("conversation already exists: {conversation_id}")]
    Conflict { conversation_id: String },

    #[error("summarisation failed: {0}")]
    Summarize(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
