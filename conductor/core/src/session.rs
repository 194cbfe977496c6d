//! Session Management
//!
//! A session is one ongoing conversation: its message history plus the
//! artifact parser state of its assistant turns.
//!
//! # Design Philosophy
//!
//! Parse state lives exactly as long as the turn it belongs to. It is created
//! when an assistant turn first streams text, disposed when the turn
//! completes or is cancelled, and destroyed wholesale when the session ends.
//! Nothing is shared between sessions.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConductorConfig;
use crate::messages::{ChatMessage, MessageId, MessageRole, SessionId};
use crate::parser::{MessageParser, ParseOutput};

/// A message in the conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message ID (also the parser turn ID)
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Raw message content, markup included
    pub content: String,
    /// Cleaned projection for display (assistant messages)
    pub display: String,
    /// When the message was created (Unix timestamp ms)
    pub timestamp: u64,
    /// Whether the message is still being streamed
    pub streaming: bool,
}

impl ConversationMessage {
    /// Create a new message
    pub fn new(role: MessageRole, content: String) -> Self {
        Self {
            id: MessageId::new(),
            role,
            display: content.clone(),
            content,
            timestamp: now_ms(),
            streaming: false,
        }
    }

    /// Create a new streaming message (content will be updated)
    pub fn streaming(role: MessageRole) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: String::new(),
            display: String::new(),
            timestamp: now_ms(),
            streaming: true,
        }
    }

    /// Append content to a streaming message
    pub fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// Mark streaming as complete
    pub fn complete(&mut self) {
        self.streaming = false;
    }
}

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session is active and ready
    Active,
    /// An assistant response is streaming
    Busy,
    /// Session has ended
    Ended,
}

/// Session metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// When the session was created (Unix timestamp ms)
    pub created_at: u64,
    /// When the session was last active (Unix timestamp ms)
    pub last_active_at: u64,
    /// Total messages exchanged
    pub message_count: u32,
    /// Model used for this session
    pub model: String,
}

impl SessionMetadata {
    /// Create new metadata
    pub fn new(model: String) -> Self {
        let now = now_ms();
        Self {
            created_at: now,
            last_active_at: now,
            message_count: 0,
            model,
        }
    }

    /// Update last active timestamp
    pub fn touch(&mut self) {
        self.last_active_at = now_ms();
    }

    /// Increment message count
    pub fn add_message(&mut self) {
        self.message_count += 1;
        self.touch();
    }
}

/// A conversation session
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// Session state
    pub state: SessionState,
    /// Session metadata
    pub metadata: SessionMetadata,
    /// Conversation history
    messages: Vec<ConversationMessage>,
    /// Currently streaming message (if any)
    current_streaming_id: Option<MessageId>,
    /// Per-turn artifact parser
    parser: MessageParser,
    /// Re-parse everything on idle (development reloads)
    reset_on_idle: bool,
}

impl Session {
    /// Create a new session
    pub fn new(model: String) -> Self {
        Self::with_id(SessionId::new(), model)
    }

    /// Create a session with a specific ID
    pub fn with_id(id: SessionId, model: String) -> Self {
        Self {
            id,
            state: SessionState::Active,
            metadata: SessionMetadata::new(model),
            messages: Vec::new(),
            current_streaming_id: None,
            parser: MessageParser::new(),
            reset_on_idle: false,
        }
    }

    /// Create a session for the configured model and parser settings
    #[must_use]
    pub fn from_config(config: &ConductorConfig) -> Self {
        Self::new(config.backend.model.clone()).with_reset_on_idle(config.parser_reset_on_idle)
    }

    /// Enable or disable the idle reset trigger
    #[must_use]
    pub fn with_reset_on_idle(mut self, enabled: bool) -> Self {
        self.reset_on_idle = enabled;
        self
    }

    /// Add a user message
    pub fn add_user_message(&mut self, content: String) -> MessageId {
        self.push_message(ConversationMessage::new(MessageRole::User, content))
    }

    /// Add a system message
    pub fn add_system_message(&mut self, content: String) -> MessageId {
        self.push_message(ConversationMessage::new(MessageRole::System, content))
    }

    fn push_message(&mut self, msg: ConversationMessage) -> MessageId {
        let id = msg.id.clone();
        self.messages.push(msg);
        self.metadata.add_message();
        id
    }

    /// Start a streaming assistant response
    ///
    /// A response still streaming is cancelled first.
    pub fn start_assistant_response(&mut self) -> MessageId {
        self.cancel_streaming();
        let msg = ConversationMessage::streaming(MessageRole::Assistant);
        let id = msg.id.clone();
        self.current_streaming_id = Some(id.clone());
        self.messages.push(msg);
        self.state = SessionState::Busy;
        id
    }

    fn streaming_message_mut(&mut self) -> Option<&mut ConversationMessage> {
        let streaming_id = self.current_streaming_id.as_ref()?;
        self.messages.iter_mut().find(|m| &m.id == streaming_id)
    }

    /// Append to the current streaming response and parse it
    ///
    /// Returns `None` when no response is streaming.
    pub fn append_streaming(&mut self, text: &str) -> Option<ParseOutput> {
        let msg = self.streaming_message_mut()?;
        msg.append(text);
        let id = msg.id.clone();
        let content = msg.content.clone();

        let output = self.parser.parse(&id, &content);
        if let Some(msg) = self.streaming_message_mut() {
            msg.display.clone_from(&output.text);
        }
        Some(output)
    }

    /// Complete the current streaming response
    ///
    /// Flushes held-back text and disposes the turn's parse state.
    pub fn complete_streaming(&mut self) -> Option<ParseOutput> {
        let streaming_id = self.current_streaming_id.take()?;
        let msg = self.messages.iter_mut().find(|m| m.id == streaming_id)?;

        let output = self.parser.finish(&msg.id, &msg.content);
        msg.display.clone_from(&output.text);
        msg.complete();
        self.metadata.add_message();
        self.state = SessionState::Active;
        Some(output)
    }

    /// Cancel the current streaming response
    pub fn cancel_streaming(&mut self) {
        if let Some(streaming_id) = self.current_streaming_id.take() {
            self.parser.dispose(&streaming_id);
            self.messages.retain(|m| m.id != streaming_id);
            self.state = SessionState::Active;
        }
    }

    /// Apply the idle reset trigger
    ///
    /// When enabled, all parse state is dropped and every assistant message is
    /// parsed again from scratch. The outputs are full replacements. Returns
    /// nothing when the trigger is disabled.
    pub fn on_idle(&mut self) -> Vec<(MessageId, ParseOutput)> {
        if !self.reset_on_idle {
            return Vec::new();
        }
        self.parser.reset();

        let mut outputs = Vec::new();
        for msg in self
            .messages
            .iter_mut()
            .filter(|m| m.role == MessageRole::Assistant)
        {
            let output = if msg.streaming {
                self.parser.parse(&msg.id, &msg.content)
            } else {
                self.parser.finish(&msg.id, &msg.content)
            };
            msg.display.clone_from(&output.text);
            outputs.push((msg.id.clone(), output));
        }
        debug!(session_id = %self.id, reparsed = outputs.len(), "Reparsed messages on idle");
        outputs
    }

    /// Get the current streaming message ID
    pub fn streaming_message_id(&self) -> Option<&MessageId> {
        self.current_streaming_id.as_ref()
    }

    /// Check if currently streaming
    pub fn is_streaming(&self) -> bool {
        self.current_streaming_id.is_some()
    }

    /// Get message by ID
    pub fn get_message(&self, id: &MessageId) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Get all messages
    pub fn all_messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Turns with live parse state
    #[must_use]
    pub fn active_parse_turns(&self) -> usize {
        self.parser.active_turns()
    }

    /// Export the completed history for a model call
    ///
    /// Assistant messages are sent raw, markup included.
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| !m.streaming)
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    /// End the session
    pub fn end(&mut self) {
        self.cancel_streaming();
        self.parser.reset();
        self.state = SessionState::Ended;
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
