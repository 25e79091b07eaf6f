use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use parley_llm::{Message as UpstreamMessage, OpenAiClient, TokenEvent, TokenReader};
use parley_memory::error::Result as MemoryResult;
use parley_memory::types::{CONTENT_TYPE_TEXT, DEFAULT_TITLE, ROLE_ASSISTANT, ROLE_SYSTEM};
use parley_memory::{MemoryError, MemoryManager, MessageInput, PromptMessage, Summarizer};

use crate::error::{ChatError, Result};
use crate::stream::{MessageStream, StreamContext};
use crate::title;
use crate::types::*;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Per-user system prompt collaborator. The default implementation returns
/// the empty string, which means "do not prepend".
pub trait UserPromptSource: Send + Sync {
    fn system_prompt(&self, user_id: &str) -> String;
}

pub struct NoUserPrompt;

impl UserPromptSource for NoUserPrompt {
    fn system_prompt(&self, _user_id: &str) -> String {
        String::new()
    }
}

/// Chat facade: validates requests, drives the memory manager and upstream
/// client, and wires the streaming pipeline.
pub struct ChatService {
    memory: Arc<MemoryManager>,
    llm: Arc<OpenAiClient>,
    prompts: Arc<dyn UserPromptSource>,
}

impl ChatService {
    pub fn new(memory: Arc<MemoryManager>, llm: Arc<OpenAiClient>) -> Self {
        Self {
            memory,
            llm,
            prompts: Arc::new(NoUserPrompt),
        }
    }

    /// Replace the per-user system prompt collaborator.
    pub fn with_prompt_source(mut self, prompts: Arc<dyn UserPromptSource>) -> Self {
        self.prompts = prompts;
        self
    }

    /// The central path: persist the user turn, assemble the prompt window,
    /// open the upstream stream, and wrap it so the full reply is persisted
    /// and title synthesis is triggered when the stream terminates.
    ///
    /// Returns the stream together with the (possibly freshly-allocated)
    /// conversation id so the transport can back-fill terminal events.
    #[instrument(skip(self, req, cancel), fields(user_id, model = %req.model))]
    pub async fn response_stream(
        &self,
        req: Completion,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<(MessageStream, String)> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        if req.model.is_empty() {
            return Err(ChatError::invalid("missing model"));
        }
        let Some(last) = req.messages.last() else {
            return Err(ChatError::invalid("empty message"));
        };

        let conversation_id = self
            .memory
            .ensure_conversation(user_id, &req.conversation_id)?;

        let user_msg = self.memory.save_user_message(
            &conversation_id,
            MessageInput {
                role: last.role.clone(),
                content_type: last.content_type.clone(),
                content: last.content.clone(),
                meta: last.meta.clone(),
                is_summary: false,
            },
        )?;

        let summarizer = CompletionSummarizer {
            llm: self.llm.as_ref(),
        };
        let mut prompt = self
            .memory
            .build_prompt(&conversation_id, &user_msg, &req.model, &summarizer)
            .await?;
        let system = self.prompts.system_prompt(user_id);
        if !system.is_empty() {
            prompt.insert(0, PromptMessage::new(ROLE_SYSTEM, system));
        }

        // An upstream failure at this point still yields a stream: the
        // pipeline reports it as the single terminal error event, and the
        // finaliser sees an empty accumulator so no assistant row appears.
        let reader = match self
            .llm
            .completion_stream(&req.model, &to_upstream(&prompt), cancel)
            .await
        {
            Ok(reader) => reader,
            Err(e) => {
                warn!(error = %e, conversation_id = %conversation_id, "upstream stream failed to open");
                erroring_reader(e.to_string())
            }
        };

        let ctx = Arc::new(StreamContext::new(conversation_id.clone()));
        let finalize = {
            let memory = Arc::clone(&self.memory);
            let llm = Arc::clone(&self.llm);
            let ctx = Arc::clone(&ctx);
            let conversation_id = conversation_id.clone();
            let model = req.model.clone();
            Box::new(move |content: &str| {
                if let Err(e) = memory.save_assistant_message(&conversation_id, content) {
                    warn!(error = %e, conversation_id = %conversation_id, "failed to persist assistant turn");
                    return;
                }
                let needs_title = match memory.conversation(&conversation_id) {
                    Ok(c) => c.title.is_empty() || c.title == DEFAULT_TITLE,
                    Err(e) => {
                        warn!(error = %e, conversation_id = %conversation_id, "failed to reload conversation");
                        false
                    }
                };
                if needs_title {
                    title::spawn_title_task(memory, llm, conversation_id, model, Some(ctx));
                }
            })
        };

        info!(conversation_id = %conversation_id, "streaming turn started");
        Ok((
            MessageStream::new(reader, ctx, finalize),
            conversation_id,
        ))
    }

    /// Non-streaming variant: one completion, both turns persisted, reply
    /// returned synchronously. Title synthesis is fire-and-forget; the
    /// response always carries the placeholder title.
    #[instrument(skip(self, req), fields(user_id, model = %req.model))]
    pub async fn create_conversation(
        &self,
        req: CreateConversationReq,
        user_id: &str,
    ) -> Result<CreateConversationResp> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        if req.model.is_empty() {
            return Err(ChatError::invalid("missing model"));
        }
        if req.message.content.trim().is_empty() {
            return Err(ChatError::invalid("empty message"));
        }

        let conversation_id = self.memory.ensure_conversation(user_id, "")?;
        let user_msg = self.memory.save_user_message(
            &conversation_id,
            MessageInput {
                role: req.message.role.clone(),
                content_type: req.message.content_type.clone(),
                content: req.message.content.clone(),
                meta: req.message.meta.clone(),
                is_summary: false,
            },
        )?;

        let mut prompt = vec![PromptMessage::new(&user_msg.role, &user_msg.content)];
        let system = self.prompts.system_prompt(user_id);
        if !system.is_empty() {
            prompt.insert(0, PromptMessage::new(ROLE_SYSTEM, system));
        }

        let reply = self
            .llm
            .completion(&req.model, &to_upstream(&prompt))
            .await?;
        self.memory.save_assistant_message(&conversation_id, &reply)?;

        title::spawn_title_task(
            Arc::clone(&self.memory),
            Arc::clone(&self.llm),
            conversation_id.clone(),
            req.model.clone(),
            None,
        );

        Ok(CreateConversationResp {
            conversation_id,
            title: DEFAULT_TITLE.to_string(),
            reply: Message {
                role: ROLE_ASSISTANT.to_string(),
                content_type: CONTENT_TYPE_TEXT.to_string(),
                content: reply,
                meta: String::new(),
            },
        })
    }

    pub fn list_conversations(
        &self,
        req: ListConversationsReq,
        user_id: &str,
    ) -> Result<ListConversationsResp> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        let (page, page_size) = normalize_paging(req.page, req.page_size);
        let offset = ((page - 1) * page_size) as usize;

        let (items, total) =
            self.memory
                .list_conversations(user_id, offset, page_size as usize)?;
        Ok(ListConversationsResp {
            total,
            page,
            page_size,
            items: items
                .into_iter()
                .map(|c| ConversationItem {
                    conversation_id: c.uuid,
                    title: c.title,
                    created_at: c.created_at,
                    updated_at: c.updated_at,
                })
                .collect(),
        })
    }

    pub fn list_messages(&self, req: ListMessagesReq, user_id: &str) -> Result<ListMessagesResp> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        if req.conversation_id.is_empty() {
            return Err(ChatError::invalid("missing conversation_id"));
        }
        let (page, page_size) = normalize_paging(req.page, req.page_size);
        let offset = ((page - 1) * page_size) as usize;

        let (items, total) = self.memory.list_messages(
            user_id,
            &req.conversation_id,
            offset,
            page_size as usize,
        )?;
        Ok(ListMessagesResp {
            total,
            page,
            page_size,
            items: items
                .into_iter()
                .map(|m| MessageItem {
                    id: m.id,
                    sequence: m.sequence,
                    role: m.role,
                    content_type: m.content_type,
                    content: m.content,
                    meta: m.meta.unwrap_or_default(),
                    is_summary: m.is_summary,
                    created_at: m.created_at,
                })
                .collect(),
        })
    }

    pub fn get_conversation(&self, conversation_id: &str, user_id: &str) -> Result<ConversationItem> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        if conversation_id.is_empty() {
            return Err(ChatError::invalid("missing conversation_id"));
        }
        let c = self.memory.get_conversation(user_id, conversation_id)?;
        Ok(ConversationItem {
            conversation_id: c.uuid,
            title: c.title,
            created_at: c.created_at,
            updated_at: c.updated_at,
        })
    }

    pub fn update_conversation_title(
        &self,
        conversation_id: &str,
        title: &str,
        user_id: &str,
    ) -> Result<()> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        if conversation_id.is_empty() {
            return Err(ChatError::invalid("missing conversation_id"));
        }
        if title.trim().is_empty() {
            return Err(ChatError::invalid("empty title"));
        }
        self.memory
            .update_conversation_title(user_id, conversation_id, title)?;
        Ok(())
    }

    pub fn delete_conversation(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        if conversation_id.is_empty() {
            return Err(ChatError::invalid("missing conversation_id"));
        }
        self.memory.delete_conversation(user_id, conversation_id)?;
        Ok(())
    }

    pub fn clear_messages(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        if user_id.is_empty() {
            return Err(ChatError::invalid("missing user"));
        }
        if conversation_id.is_empty() {
            return Err(ChatError::invalid("missing conversation_id"));
        }
        self.memory.clear_messages(user_id, conversation_id)?;
        Ok(())
    }

    /// Passthrough to the upstream model catalogue.
    pub async fn pull_models(&self) -> Result<ModelListResp> {
        let data = self.llm.list_models().await?;
        Ok(ModelListResp { data })
    }

    /// The per-user system prompt; empty means "do not prepend".
    pub fn build_user_system_prompt(&self, user_id: &str) -> String {
        self.prompts.system_prompt(user_id)
    }
}

/// Condenses older turns by running them through a non-streaming completion.
struct CompletionSummarizer<'a> {
    llm: &'a OpenAiClient,
}

#[async_trait]
impl Summarizer for CompletionSummarizer<'_> {
    async fn summarize(&self, model: &str, messages: &[PromptMessage]) -> MemoryResult<String> {
        let mut prompt = Vec::with_capacity(messages.len() + 1);
        prompt.push(UpstreamMessage::new(
            ROLE_SYSTEM,
            "Condense the conversation so far into a short summary. \
             Keep facts, names, and decisions. Return only the summary.",
        ));
        prompt.extend(messages.iter().map(|m| UpstreamMessage::new(&m.role, &m.content)));
        self.llm
            .completion(model, &prompt)
            .await
            .map_err(|e| MemoryError::Summarize(e.to_string()))
    }
}

fn to_upstream(prompt: &[PromptMessage]) -> Vec<UpstreamMessage> {
    prompt
        .iter()
        .map(|m| UpstreamMessage::new(&m.role, &m.content))
        .collect()
}

/// A reader that yields a single error event and ends.
fn erroring_reader(message: String) -> TokenReader {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(TokenEvent::Error { message });
    TokenReader::new(rx, CancellationToken::new())
}

fn normalize_paging(page: i64, page_size: i64) -> (i64, i64) {
    let page = if page <= 0 { 1 } else { page };
    let page_size = if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else if page_size > MAX_PAGE_SIZE {
        MAX_PAGE_SIZE
    } else {
        page_size
    };
    (page, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_apply() {
        assert_eq!(normalize_paging(0, 0), (1, 20));
        assert_eq!(normalize_paging(-5, -1), (1, 20));
    }

    #[test]
    fn paging_caps_page_size() {
        assert_eq!(normalize_paging(2, 1_000_000), (2, 100));
        assert_eq!(normalize_paging(3, 100), (3, 100));
    }

    #[test]
    fn paging_passes_valid_values() {
        assert_eq!(normalize_paging(4, 25), (4, 25));
    }
}
