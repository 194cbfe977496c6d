//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history (NDJSON stream)
//! - `/api/tags` - List available models, used as the health probe
//!
//! The final NDJSON object of a chat stream carries `done: true`, the
//! `done_reason` and the token counts.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::{FinishReason, LlmBackend, LlmRequest, StreamingToken, Usage};
use crate::config::ConductorConfig;

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

/// One NDJSON line of a streaming `/api/chat` response
#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl ChatChunk {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(Usage {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
        })
    }
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16, request_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            host: host.into(),
            port,
            http_client: reqwest::Client::builder().timeout(request_timeout).build()?,
        })
    }

    /// Create from the resolved configuration
    pub fn from_config(config: &ConductorConfig) -> anyhow::Result<Self> {
        Self::new(
            config.backend.host.clone(),
            config.backend.port,
            Duration::from_secs(config.backend.request_timeout_secs),
        )
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for a streaming chat call
    fn build_body(request: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.wire_messages(),
            "stream": true,
        });

        if request.max_tokens > 0 {
            body["options"] = serde_json::json!({ "num_predict": request.max_tokens });
        }
        body
    }
}

/// Accumulates one call's output and turns NDJSON lines into tokens
///
/// Raw bytes are buffered until a full line is available, so a character
/// split across network chunks is only decoded once complete.
#[derive(Debug, Default)]
struct ChatStreamDecoder {
    buffer: BytesMut,
    full_response: String,
}

impl ChatStreamDecoder {
    /// Feed raw bytes, returning every token completed by them
    ///
    /// Decoding stops at the first terminal token.
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamingToken> {
        self.buffer.extend_from_slice(bytes);
        let mut tokens = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            let chunk = match serde_json::from_slice::<ChatChunk>(line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable Ollama line");
                    continue;
                }
            };
            if let Some(token) = self.apply(chunk, &mut tokens) {
                tokens.push(token);
                break;
            }
        }
        tokens
    }

    /// Returns the terminal token, if this chunk ends the call
    fn apply(&mut self, chunk: ChatChunk, tokens: &mut Vec<StreamingToken>) -> Option<StreamingToken> {
        if let Some(error) = chunk.error {
            return Some(StreamingToken::Error(error));
        }
        if let Some(content) = chunk.message.as_ref().map(|m| m.content.as_str()) {
            if !content.is_empty() {
                self.full_response.push_str(content);
                tokens.push(StreamingToken::Token(content.to_string()));
            }
        }
        if chunk.done {
            return Some(StreamingToken::Complete {
                message: std::mem::take(&mut self.full_response),
                finish_reason: FinishReason::from_wire(chunk.done_reason.as_deref()),
                usage: chunk.usage(),
            });
        }
        None
    }

    /// Token to send when the body ends without a done line
    ///
    /// Ollama always terminates a chat stream with `done: true`; a body
    /// that ends before it was cut off.
    fn finish(self) -> StreamingToken {
        StreamingToken::Error(format!(
            "Ollama stream ended without a done line after {} bytes of response",
            self.full_response.len()
        ))
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request))
            .send()
            .await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        debug!(model = %request.model, max_tokens = request.max_tokens, "Ollama chat stream opened");
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = ChatStreamDecoder::default();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };
                for token in decoder.feed(&bytes) {
                    let terminal = !matches!(token, StreamingToken::Token(_));
                    if tx.send(token).await.is_err() {
                        // Receiver dropped, stop streaming
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }

            let _ = tx.send(decoder.finish()).await;
        });

        Ok(rx)
    }
}
