//! LLM Backend Integration
//!
//! Abstracted access to model backends through a common trait interface.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use stream_conductor::backend::{OllamaBackend, LlmBackend, LlmRequest};
//! use stream_conductor::ChatMessage;
//!
//! let backend = OllamaBackend::from_config(&config)?;
//! let request = LlmRequest::new(vec![ChatMessage::user("Hello!")], "llama3.2");
//! let rx = backend.send_streaming(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{FinishReason, LlmBackend, LlmRequest, StreamingToken, Usage};
