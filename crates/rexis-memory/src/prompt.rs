//! Prompt hydration
//!
//! Builds the message list returned by `memory_prompt`: the session summary,
//! the session's conversation, the relevant long-term memories, and finally
//! the caller's query.

use crate::model::{MessageRole, WorkingMemory};
use crate::search::ScoredRecord;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const SUMMARY_HEADER: &str = "## A summary of the conversation so far:\n";
const MEMORIES_HEADER: &str = "## Relevant memories from long-term storage:\n\n";

/// One message of a hydrated prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PromptMessage {
    /// Speaker
    pub role: MessageRole,

    /// Text
    pub content: String,
}

impl PromptMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A prompt ready to send to a model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MemoryPrompt {
    /// Messages in order
    pub messages: Vec<PromptMessage>,
}

impl MemoryPrompt {
    /// Assemble the prompt
    pub fn render(query: &str, session: Option<&WorkingMemory>, memories: &[ScoredRecord]) -> Self {
        let mut messages = Vec::new();

        if let Some(session) = session {
            if let Some(context) = session.context.as_deref().filter(|c| !c.is_empty()) {
                messages.push(PromptMessage::new(
                    MessageRole::System,
                    format!("{}{}", SUMMARY_HEADER, context),
                ));
            }

            messages.extend(
                session
                    .messages
                    .iter()
                    .map(|message| PromptMessage::new(message.role, message.content.clone())),
            );
        }

        if !memories.is_empty() {
            let mut block = String::from(MEMORIES_HEADER);
            for memory in memories {
                block.push_str("- ");
                block.push_str(&memory.record.text);
                block.push('\n');
            }
            messages.push(PromptMessage::new(MessageRole::System, block));
        }

        messages.push(PromptMessage::new(MessageRole::User, query));

        Self { messages }
    }
}
