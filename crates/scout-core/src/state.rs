//! UI-agnostic conversation state types
//!
//! These types are shared between the reconciler, the HTTP client (they are
//! sent verbatim as the `messages` array of a chat request) and the UI.

use serde::{Deserialize, Serialize};

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Why the reply stopped early. Shown inline, never sent back to the backend.
    #[serde(skip)]
    pub error: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            error: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Ordered chat history.
///
/// Append-only, except that the last message may be mutated in place while
/// an assistant reply is streaming into it.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Mutable access to the trailing assistant message, if the transcript ends with one.
    pub fn last_assistant_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .last_mut()
            .filter(|m| m.role == ChatRole::Assistant)
    }

    /// Remove the trailing message if it is an assistant message with no content.
    pub fn drop_empty_tail(&mut self) -> bool {
        let empty_tail = self
            .messages
            .last()
            .is_some_and(|m| m.role == ChatRole::Assistant && m.content.is_empty());
        if empty_tail {
            self.messages.pop();
        }
        empty_tail
    }

    /// Messages to send as request history. Assistant messages without
    /// content (the in-flight placeholder, replies that failed before any
    /// token) are left out; partial replies keep only the model's text.
    pub fn request_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| !(m.role == ChatRole::Assistant && m.content.is_empty()))
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
                error: None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
