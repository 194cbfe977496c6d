//! Stream Conductor Core - Streaming Artifact Parsing and Multi-Call Responses
//!
//! This crate turns a model's streamed output into two things at once: one
//! uninterrupted byte stream for an HTTP client, even when the response took
//! several model calls, and a structured view of the artifacts and actions
//! embedded in the text.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Continuation Orchestrator                    │
//! │   ┌─────────────┐      ┌─────────────────┐     ┌──────────────┐  │
//! │   │ LlmBackend  │ ───▶ │ StreamSwitcher  │ ──▶ │ SwitchedStream│──┼──▶ HTTP body
//! │   │  (Ollama)   │ ◀─── │  (budgeted)     │     └──────────────┘  │
//! │   └─────────────┘ len  └─────────────────┘                       │
//! └──────────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Session                               │
//! │   cumulative text ──▶ MessageParser ──▶ ParseOutput              │
//! │                       (TagScanner)       ├─ cleaned text         │
//! │                                          └─ ParserEvents         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two halves are independent: the parser sees the logical text of a
//! turn no matter how many model calls produced it.
//!
//! # Key Types
//!
//! - [`MessageParser`]: Per-turn incremental artifact/action parser
//! - [`StreamSwitcher`]: Stable downstream over replaceable upstream sources
//! - [`ContinuationOrchestrator`]: Continues truncated responses
//! - [`Session`]: Conversation history owning its parse state
//! - [`ConductorConfig`]: Layered configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use stream_conductor::{
//!     backend::OllamaBackend, load_config, ChatMessage, ContinuationOrchestrator,
//!     ContinuationSettings,
//! };
//!
//! let config = load_config()?;
//! let backend = Arc::new(OllamaBackend::from_config(&config)?);
//! let orchestrator =
//!     ContinuationOrchestrator::new(backend, ContinuationSettings::from_config(&config));
//!
//! let run = orchestrator.start(vec![ChatMessage::user("Build a todo app")]).await?;
//! // Hand `run.downstream` to the HTTP response
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod continuation;
pub mod markup;
pub mod messages;
pub mod parser;
pub mod session;
pub mod streaming;

// Re-export commonly used types
pub use backend::{FinishReason, LlmBackend, LlmRequest, OllamaBackend, StreamingToken, Usage};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConductorConfig, ConfigError,
    ConfigOverrides, ConfigSource,
};
pub use continuation::{
    ContinuationError, ContinuationOrchestrator, ContinuationRun, ContinuationSettings,
    RunHandle, RunOutcome, CONTINUE_PROMPT,
};
pub use messages::{ChatMessage, MessageId, MessageRole, SessionId};
pub use parser::{
    ActionData, ActionKind, ArtifactData, MessageParser, ParseOutput, ParsePhase, ParserEvent,
};
pub use session::{ConversationMessage, Session, SessionMetadata, SessionState};
pub use streaming::{ByteSource, StreamSwitcher, SwitchCount, SwitchError, SwitchedStream};
