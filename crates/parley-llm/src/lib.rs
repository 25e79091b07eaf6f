pub mod client;
pub mod error;
pub mod stream;

pub use client::{Message, ModelInfo, OpenAiClient};
pub use error::LlmError;
pub use stream::{TokenEvent, TokenReader};
