//! LLM Backend Traits
//!
//! Trait definitions for model backends. The continuation orchestrator only
//! talks to this interface, so tests can drive it with scripted backends.
//!
//! # Design Philosophy
//!
//! A backend call produces a channel of [`StreamingToken`]s. The terminal
//! [`StreamingToken::Complete`] carries *why* generation stopped, which is
//! what decides whether another call is needed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::messages::ChatMessage;

/// Why a model call stopped producing tokens
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// The model finished on its own
    Stop,
    /// The per-call token budget ran out
    Length,
    /// Anything else the backend reports
    Other(String),
}

impl FinishReason {
    /// Map a backend's wire value; a missing reason counts as a normal stop
    #[must_use]
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            None | Some("" | "stop") => Self::Stop,
            Some("length") => Self::Length,
            Some(other) => Self::Other(other.to_string()),
        }
    }

    /// Whether the output was cut off by the token budget
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Length)
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => f.write_str("stop"),
            Self::Length => f.write_str("length"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Token accounting reported at the end of a call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens generated
    pub completion_tokens: u32,
}

impl Usage {
    /// Prompt plus completion
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Token stream events from LLM backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A token from the response
    Token(String),
    /// Response completed
    Complete {
        /// The complete message of this call
        message: String,
        /// Why generation stopped
        finish_reason: FinishReason,
        /// Token accounting, if the backend reports it
        usage: Option<Usage>,
    },
    /// Error occurred during streaming
    Error(String),
}

/// A chat completion request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlmRequest {
    /// Conversation so far, oldest first
    pub messages: Vec<ChatMessage>,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Maximum tokens in the response (0 = backend default)
    pub max_tokens: u32,
    /// System prompt, sent ahead of `messages`
    pub system: Option<String>,
}

impl LlmRequest {
    /// Create a request for a conversation
    pub fn new(messages: Vec<ChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            max_tokens: 0,
            system: None,
        }
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Messages as sent on the wire, system prompt first
    #[must_use]
    pub fn wire_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = self.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that will receive tokens as they arrive.
    /// The last item is either [`StreamingToken::Complete`] or
    /// [`StreamingToken::Error`]; the channel closes after it.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_request_builder() {
        let request = LlmRequest::new(vec![ChatMessage::user("Hello")], "llama3.2")
            .with_system("You are helpful")
            .with_max_tokens(100);

        assert_eq!(request.model, "llama3.2");
        assert_eq!(request.system.as_deref(), Some("You are helpful"));
        assert_eq!(request.max_tokens, 100);
    }

    #[test]
    fn test_wire_messages_put_system_first() {
        let request = LlmRequest::new(vec![ChatMessage::user("Hi")], "m").with_system("sys");
        let wire = request.wire_messages();
        assert_eq!(wire, vec![ChatMessage::system("sys"), ChatMessage::user("Hi")]);

        let bare = LlmRequest::new(vec![ChatMessage::user("Hi")], "m").with_system("");
        assert_eq!(bare.wire_messages().len(), 1);
    }

    #[test]
    fn test_finish_reason_from_wire() {
        assert_eq!(FinishReason::from_wire(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(None), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(Some("length")), FinishReason::Length);
        assert!(FinishReason::from_wire(Some("length")).is_truncated());
        assert_eq!(
            FinishReason::from_wire(Some("load")),
            FinishReason::Other("load".to_string())
        );
        assert_eq!(FinishReason::Length.to_string(), "length");
    }

    #[test]
    fn test_usage_total() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 32,
        };
        assert_eq!(usage.total(), 42);
    }
}
