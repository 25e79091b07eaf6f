use std::sync::Arc;

use tracing::{debug, warn};

use parley_llm::{Message, OpenAiClient};
use parley_memory::types::{DEFAULT_TITLE, ROLE_SYSTEM};
use parley_memory::MemoryManager;

use crate::error::Result;
use crate::stream::StreamContext;

pub(crate) const TITLE_MAX_CHARS: usize = 20;
pub(crate) const TITLE_MESSAGE_LIMIT: usize = 4;

/// Kick off best-effort title synthesis on a detached task.
///
/// The task runs on a fresh context uncoupled from the originating request,
/// so cancelling the RPC does not kill it. Errors are logged and swallowed.
/// When a `StreamContext` is given, a successful title is also published
/// there for the terminal stream event.
pub(crate) fn spawn_title_task(
    memory: Arc<MemoryManager>,
    llm: Arc<OpenAiClient>,
    conversation_id: String,
    model: String,
    ctx: Option<Arc<StreamContext>>,
) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        match generate_title(&memory, &llm, &conversation_id, &model).await {
            Ok(Some(title)) => {
                debug!(conversation_id = %conversation_id, title = %title, "title synthesised");
                if let Some(ctx) = ctx {
                    ctx.set_title(&title);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, conversation_id = %conversation_id, "title synthesis failed");
            }
        }
    });
}

/// Synthesise and store a title for a conversation that still carries the
/// placeholder. Returns `None` when there is nothing to do.
pub(crate) async fn generate_title(
    memory: &MemoryManager,
    llm: &OpenAiClient,
    conversation_id: &str,
    model: &str,
) -> Result<Option<String>> {
    let conversation = memory.conversation(conversation_id)?;
    if !conversation.title.is_empty() && conversation.title != DEFAULT_TITLE {
        return Ok(None);
    }
    let context = memory.build_title_messages(conversation_id, TITLE_MESSAGE_LIMIT)?;
    if context.is_empty() {
        return Ok(None);
    }

    let mut prompt = Vec::with_capacity(context.len() + 1);
    prompt.push(Message::new(
        ROLE_SYSTEM,
        format!("Generate a short title (<={TITLE_MAX_CHARS} chars). Return only the title."),
    ));
    prompt.extend(context.iter().map(|m| Message::new(&m.role, &m.content)));

    let raw = llm.completion(model, &prompt).await?;
    let title = raw.trim().trim_matches('"').trim().to_string();
    if title.is_empty() {
        return Ok(None);
    }
    memory.set_title(conversation_id, &title)?;
    Ok(Some(title))
}
