//! Daemon HTTP Server
//!
//! Serves the chat endpoint and a health probe:
//!
//! ```text
//!   POST /api/chat ──▶ ContinuationOrchestrator::start ──▶ 200 text/plain (streamed)
//!                                         │ first call fails
//!                                         └──────────────▶ 500
//!   GET  /health   ──▶ LlmBackend::health_check
//! ```
//!
//! The response body is the switched downstream: continuation calls are
//! invisible to the client. A failure after the first byte ends the body
//! early instead of changing the status.

use std::future::Future;

use anyhow::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use stream_conductor::{ChatMessage, ContinuationOrchestrator, RunOutcome};

/// Shared handler state
#[derive(Clone, Debug)]
pub struct DaemonState {
    orchestrator: ContinuationOrchestrator,
}

impl DaemonState {
    /// Create handler state
    pub fn new(orchestrator: ContinuationOrchestrator) -> Self {
        Self { orchestrator }
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far, oldest first
    pub messages: Vec<ChatMessage>,
}

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: String,
    /// Backend name
    pub backend: String,
    /// Configured model
    pub model: String,
}

/// Build the application router
pub fn router(state: DaemonState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: DaemonState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Listening for HTTP requests");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn chat(State(state): State<DaemonState>, Json(request): Json<ChatRequest>) -> Response {
    if request.messages.is_empty() {
        return (StatusCode::BAD_REQUEST, "messages must not be empty").into_response();
    }
    info!(messages = request.messages.len(), "Chat request received");

    let run = match state.orchestrator.start(request.messages).await {
        Ok(run) => run,
        Err(e) => {
            error!(error = %e, "Failed to start model call");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let handle = run.handle;
    tokio::spawn(async move {
        match handle.outcome().await {
            RunOutcome::Completed { segments, .. } => {
                info!(segments, "Response completed");
            }
            RunOutcome::BudgetExceeded { segments } => {
                warn!(segments, "Response ended: maximum segments reached");
            }
            RunOutcome::UpstreamFailed(reason) => {
                warn!(error = %reason, "Response ended: model call failed");
            }
            RunOutcome::Cancelled => info!("Response cancelled by client"),
        }
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(run.downstream),
    )
        .into_response()
}

async fn health(State(state): State<DaemonState>) -> (StatusCode, Json<HealthResponse>) {
    let backend = state.orchestrator.backend();
    let healthy = backend.health_check().await;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            backend: backend.name().to_string(),
            model: state.orchestrator.settings().model.clone(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::Request;
    use stream_conductor::{
        ContinuationSettings, FinishReason, LlmBackend, LlmRequest, StreamingToken,
    };
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    /// Replays one scripted call per request
    struct ScriptedBackend {
        calls: Mutex<Vec<Vec<StreamingToken>>>,
        healthy: bool,
    }

    impl ScriptedBackend {
        fn new(calls: Vec<Vec<StreamingToken>>) -> Self {
            Self {
                calls: Mutex::new(calls.into_iter().rev().collect()),
                healthy: true,
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }

        async fn send_streaming(
            &self,
            _request: &LlmRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            let Some(tokens) = self.calls.lock().unwrap().pop() else {
                anyhow::bail!("no scripted call left");
            };
            let (tx, rx) = mpsc::channel(tokens.len().max(1));
            for token in tokens {
                tx.send(token).await?;
            }
            Ok(rx)
        }
    }

    fn segment(text: &str, finish_reason: FinishReason) -> Vec<StreamingToken> {
        vec![
            StreamingToken::Token(text.to_string()),
            StreamingToken::Complete {
                message: text.to_string(),
                finish_reason,
                usage: None,
            },
        ]
    }

    fn app(backend: ScriptedBackend) -> Router {
        let settings = ContinuationSettings {
            model: "test-model".to_string(),
            max_tokens: 16,
            max_switches: 2,
            system_prompt: None,
        };
        router(DaemonState::new(ContinuationOrchestrator::new(
            Arc::new(backend),
            settings,
        )))
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_streams_continued_response() {
        let backend = ScriptedBackend::new(vec![
            segment("Hello, ", FinishReason::Length),
            segment("world!", FinishReason::Stop),
        ]);

        let response = app(backend)
            .oneshot(chat_request(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Hello, world!");
    }

    #[tokio::test]
    async fn test_chat_first_call_failure_is_500() {
        let response = app(ScriptedBackend::new(vec![]))
            .oneshot(chat_request(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_history() {
        let response = app(ScriptedBackend::new(vec![]))
            .oneshot(chat_request(r#"{"messages":[]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let mut backend = ScriptedBackend::new(vec![]);
        backend.healthy = false;

        let response = app(backend)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "degraded");
        assert_eq!(health.backend, "Scripted");
        assert_eq!(health.model, "test-model");
    }
}
