pub mod config;
pub mod error;
pub mod ids;

pub use config::ParleyConfig;
pub use error::CoreError;
pub use ids::{new_conversation_id, MessageIdGen};
