use async_trait::async_trait;
use tracing::{debug, instrument};

use parley_core::ids::new_conversation_id;

use crate::error::{MemoryError, Result};
use crate::store::ConversationStore;
use crate::types::*;

/// How many trailing non-summary rows survive a condensation pass.
const SUMMARY_KEEP_RECENT: usize = 4;

/// Condenses older turns into a single string when the prompt window
/// outgrows its character budget. Implemented upstream of this crate by
/// whatever can run a completion.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, model: &str, messages: &[PromptMessage]) -> Result<String>;
}

/// Conversation memory: ownership enforcement, per-conversation sequencing,
/// prompt-window and title-window assembly.
///
/// Storage calls are synchronous SQLite under the store's connection lock;
/// the only await point (`build_prompt`'s summarisation) happens with no
/// lock held.
pub struct MemoryManager {
    store: ConversationStore,
    window: usize,
    max_prompt_chars: usize,
}

impl MemoryManager {
    pub fn new(store: ConversationStore, cfg: &parley_core::config::MemoryConfig) -> Self {
        Self {
            store,
            window: cfg.window,
            max_prompt_chars: cfg.max_prompt_chars,
        }
    }

    /// Resolve the conversation for a turn: allocate a fresh one when the
    /// caller supplied no id, otherwise verify ownership of the given id.
    #[instrument(skip(self), fields(user_id, maybe_id))]
    pub fn ensure_conversation(&self, user_id: &str, maybe_id: &str) -> Result<String> {
        if maybe_id.is_empty() {
            let id = new_conversation_id();
            self.store.create_conversation(&id, user_id, DEFAULT_TITLE)?;
            debug!(conversation_id = %id, "allocated conversation");
            return Ok(id);
        }
        self.check_owner(user_id, maybe_id)?;
        Ok(maybe_id.to_string())
    }

    /// Append the caller's turn. Role defaults to `user`, content type to
    /// `text`; a caller can never append a summary row through this path.
    pub fn save_user_message(
        &self,
        conversation_id: &str,
        mut input: MessageInput,
    ) -> Result<MessageRecord> {
        input.is_summary = false;
        self.store.append_message(conversation_id, &input)
    }

    /// Append the model's reply for the current turn.
    pub fn save_assistant_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        self.store.append_message(
            conversation_id,
            &MessageInput {
                role: ROLE_ASSISTANT.to_string(),
                content_type: CONTENT_TYPE_TEXT.to_string(),
                content: content.to_string(),
                ..MessageInput::default()
            },
        )?;
        Ok(())
    }

    /// Assemble the prompt window for a turn.
    ///
    /// Reads the trailing window, turns stored summaries into leading
    /// `system` entries, and keeps textual rows in sequence order with the
    /// latest user message last. When the composed window exceeds the
    /// character budget the older rows are condensed through `summarizer`,
    /// persisted as a summary row, and the window is rebuilt.
    #[instrument(skip(self, latest, summarizer), fields(conversation_id, model))]
    pub async fn build_prompt(
        &self,
        conversation_id: &str,
        latest: &MessageRecord,
        model: &str,
        summarizer: &dyn Summarizer,
    ) -> Result<Vec<PromptMessage>> {
        let tail = self.store.list_tail_messages(conversation_id, self.window)?;
        let prompt = compose_prompt(&tail, latest);
        if prompt_chars(&prompt) <= self.max_prompt_chars {
            return Ok(prompt);
        }

        // Split the window: the last SUMMARY_KEEP_RECENT non-summary rows
        // stay verbatim, everything before them gets condensed.
        let non_summary = tail.iter().filter(|m| !m.is_summary).count();
        if non_summary <= SUMMARY_KEEP_RECENT {
            return Ok(prompt);
        }
        let first_kept = tail
            .iter()
            .filter(|m| !m.is_summary)
            .nth(non_summary - SUMMARY_KEEP_RECENT)
            .map(|m| m.sequence)
            .unwrap_or(i64::MAX);
        let older: Vec<&MessageRecord> =
            tail.iter().filter(|m| m.sequence < first_kept).collect();
        if older.is_empty() {
            return Ok(prompt);
        }
        let through_sequence = older.iter().map(|m| m.sequence).max().unwrap_or(0);
        let older_prompt: Vec<PromptMessage> = older.iter().map(|m| to_prompt_entry(m)).collect();

        let condensed = summarizer.summarize(model, &older_prompt).await?;
        self.store
            .replace_prefix_with_summary(conversation_id, &condensed, through_sequence)?;
        debug!(
            conversation_id,
            through_sequence, "condensed older turns into summary"
        );

        let tail = self.store.list_tail_messages(conversation_id, self.window)?;
        Ok(compose_prompt(&tail, latest))
    }

    /// The opening non-summary messages, used as title-synthesis context.
    pub fn build_title_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<PromptMessage>> {
        let head = self.store.list_head_messages(conversation_id, limit)?;
        Ok(head
            .iter()
            .filter(|m| m.content_type == CONTENT_TYPE_TEXT)
            .map(|m| PromptMessage::new(&m.role, &m.content))
            .collect())
    }

    /// Load a conversation without an ownership check. For internal tasks
    /// (title synthesis) that act on behalf of the service itself.
    pub fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.store.get_conversation(conversation_id)
    }

    /// Write a title without an ownership check. Internal-task counterpart
    /// of [`MemoryManager::update_conversation_title`].
    pub fn set_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        self.store.update_conversation_title(conversation_id, title)
    }

    pub fn get_conversation(&self, user_id: &str, conversation_id: &str) -> Result<Conversation> {
        self.check_owner(user_id, conversation_id)
    }

    pub fn list_conversations(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Conversation>, i64)> {
        self.store.list_conversations(user_id, offset, limit)
    }

    pub fn list_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<MessageRecord>, i64)> {
        self.check_owner(user_id, conversation_id)?;
        self.store.list_messages(conversation_id, offset, limit)
    }

    pub fn update_conversation_title(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<()> {
        self.check_owner(user_id, conversation_id)?;
        self.store.update_conversation_title(conversation_id, title)
    }

    /// Remove messages first, then the conversation row.
    pub fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        self.check_owner(user_id, conversation_id)?;
        self.store.clear_messages(conversation_id)?;
        self.store.delete_conversation(conversation_id)
    }

    /// Drop all rows for the conversation but keep the conversation itself.
    pub fn clear_messages(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        self.check_owner(user_id, conversation_id)?;
        self.store.clear_messages(conversation_id)
    }

    fn check_owner(&self, user_id: &str, conversation_id: &str) -> Result<Conversation> {
        let conversation = self.store.get_conversation(conversation_id)?;
        if conversation.user_id != user_id {
            return Err(MemoryError::Forbidden {
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(conversation)
    }
}

fn to_prompt_entry(m: &MessageRecord) -> PromptMessage {
    if m.is_summary {
        PromptMessage::new(ROLE_SYSTEM, format!("<summary> {}", m.content))
    } else {
        PromptMessage::new(&m.role, &m.content)
    }
}

/// Map the stored window into prompt entries: summaries first as `system`
/// lines, textual rows in sequence order, the latest user message last.
fn compose_prompt(tail: &[MessageRecord], latest: &MessageRecord) -> Vec<PromptMessage> {
    let mut out = Vec::with_capacity(tail.len() + 1);
    let mut latest_included = false;
    for m in tail {
        if !m.is_summary && m.content_type != CONTENT_TYPE_TEXT {
            continue;
        }
        out.push(to_prompt_entry(m));
        if m.id == latest.id {
            latest_included = true;
        }
    }
    if !latest_included {
        out.push(PromptMessage::new(&latest.role, &latest.content));
    }
    out
}

fn prompt_chars(prompt: &[PromptMessage]) -> usize {
    prompt.iter().map(|m| m.role.len() + m.content.len()).sum()
}
