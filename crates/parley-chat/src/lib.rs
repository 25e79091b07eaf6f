pub mod error;
pub mod service;
pub mod stream;
mod title;
pub mod types;

pub use error::ChatError;
pub use service::{ChatService, NoUserPrompt, UserPromptSource};
pub use stream::{MessageStream, StreamContext};
