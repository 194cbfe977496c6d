//! Continuation Orchestrator
//!
//! Runs one logical response across as many model calls as the switch budget
//! allows. Every call's tokens feed a [`StreamSwitcher`]; when a call stops
//! because it hit its token budget, the partial answer and [`CONTINUE_PROMPT`]
//! are appended to the history and a fresh call is switched in.
//!
//! # Architecture
//!
//! ```text
//!   backend call ──▶ tap ──▶ ByteSource ──▶ StreamSwitcher ──▶ SwitchedStream
//!                     │
//!                     └──▶ oneshot(SegmentEnd) ──▶ driver task
//!                                                   ├─ stop      → close()
//!                                                   ├─ length    → new call, switch_source()
//!                                                   └─ failure   → close(), no retry
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{FinishReason, LlmBackend, LlmRequest, StreamingToken, Usage};
use crate::config::ConductorConfig;
use crate::messages::ChatMessage;
use crate::streaming::{ByteSource, StreamSwitcher, SwitchCount, SwitchError, SwitchedStream};

/// User message sent after a response was cut off by the token budget
pub const CONTINUE_PROMPT: &str = "Continue your prior response. IMPORTANT: Immediately begin from \
where you left off without any interruptions. Do not repeat any content, including artifact and \
action tags.";

/// Errors starting a run
#[derive(Debug, Error)]
pub enum ContinuationError {
    /// The first model call could not be started
    #[error(transparent)]
    Request(#[from] anyhow::Error),
}

/// How a run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The last call finished normally
    Completed {
        /// Model calls made
        segments: u32,
        /// Finish reason of the last call
        finish_reason: FinishReason,
    },
    /// A call was truncated with no switches left
    BudgetExceeded {
        /// Model calls made
        segments: u32,
    },
    /// A model call failed; not retried
    UpstreamFailed(String),
    /// The downstream reader went away
    Cancelled,
}

/// Per-call request parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContinuationSettings {
    /// Model to request
    pub model: String,
    /// Output token budget per call
    pub max_tokens: u32,
    /// Continuation calls allowed after the first
    pub max_switches: u32,
    /// System prompt sent with every call
    pub system_prompt: Option<String>,
}

impl ContinuationSettings {
    /// Take the generation settings from the resolved configuration
    #[must_use]
    pub fn from_config(config: &ConductorConfig) -> Self {
        Self {
            model: config.backend.model.clone(),
            max_tokens: config.generation.max_tokens,
            max_switches: config.generation.max_continuations,
            system_prompt: Some(config.generation.system_prompt.clone())
                .filter(|prompt| !prompt.is_empty()),
        }
    }

    fn request(&self, messages: &[ChatMessage]) -> LlmRequest {
        let request = LlmRequest::new(messages.to_vec(), self.model.clone())
            .with_max_tokens(self.max_tokens);
        match self.system_prompt {
            Some(ref system) => request.with_system(system.clone()),
            None => request,
        }
    }
}

/// Starts continuation runs against a backend
#[derive(Clone)]
pub struct ContinuationOrchestrator {
    backend: Arc<dyn LlmBackend>,
    settings: ContinuationSettings,
}

impl ContinuationOrchestrator {
    /// Create an orchestrator
    pub fn new(backend: Arc<dyn LlmBackend>, settings: ContinuationSettings) -> Self {
        Self { backend, settings }
    }

    /// Per-call parameters in use
    #[must_use]
    pub fn settings(&self) -> &ContinuationSettings {
        &self.settings
    }

    /// The backend runs are issued against
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn LlmBackend> {
        &self.backend
    }

    /// Issue the first call and hand the rest of the run to a background task
    ///
    /// # Errors
    ///
    /// Returns [`ContinuationError::Request`] if the first call cannot be
    /// started. Later failures end the downstream instead.
    pub async fn start(&self, messages: Vec<ChatMessage>) -> Result<ContinuationRun, ContinuationError> {
        let rx = self
            .backend
            .send_streaming(&self.settings.request(&messages))
            .await?;
        let (source, done) = tap(rx);
        let (switcher, downstream) = StreamSwitcher::new(source, self.settings.max_switches);
        let switches = switcher.switch_count();

        debug!(
            backend = self.backend.name(),
            model = %self.settings.model,
            history = messages.len(),
            "Response stream started"
        );

        let task = tokio::spawn(drive(
            Arc::clone(&self.backend),
            self.settings.clone(),
            messages,
            switcher,
            done,
        ));

        Ok(ContinuationRun {
            downstream,
            handle: RunHandle { switches, task },
        })
    }
}

impl std::fmt::Debug for ContinuationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationOrchestrator")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .finish()
    }
}

/// A running response
#[derive(Debug)]
pub struct ContinuationRun {
    /// The single downstream byte stream
    pub downstream: SwitchedStream,
    /// Progress and outcome of the driver task
    pub handle: RunHandle,
}

/// Observes the driver task of a run
#[derive(Debug)]
pub struct RunHandle {
    switches: SwitchCount,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Continuation switches performed so far
    #[must_use]
    pub fn switches(&self) -> u32 {
        self.switches.get()
    }

    /// Wait for the run to end
    pub async fn outcome(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Continuation driver did not finish");
                RunOutcome::Cancelled
            }
        }
    }
}

/// How one model call ended
#[derive(Debug)]
enum SegmentEnd {
    Finished {
        message: String,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
    Failed(String),
}

/// Split a backend token channel into bytes and a terminal report
///
/// The byte stream ends at the terminal token. A failure, including a
/// channel that closes without one, is also yielded as an error item. If
/// the stream is dropped before the end, the report sender is dropped too.
fn tap(rx: mpsc::Receiver<StreamingToken>) -> (ByteSource, oneshot::Receiver<SegmentEnd>) {
    let (done_tx, done_rx) = oneshot::channel();

    let source = futures::stream::unfold((rx, Some(done_tx)), |(mut rx, mut done)| async move {
        let report = |done: &mut Option<oneshot::Sender<SegmentEnd>>, end: SegmentEnd| {
            if let Some(tx) = done.take() {
                let _ = tx.send(end);
            }
        };

        match rx.recv().await {
            Some(StreamingToken::Token(token)) => Some((Ok(Bytes::from(token)), (rx, done))),
            Some(StreamingToken::Complete {
                message,
                finish_reason,
                usage,
            }) => {
                report(
                    &mut done,
                    SegmentEnd::Finished {
                        message,
                        finish_reason,
                        usage,
                    },
                );
                None
            }
            Some(StreamingToken::Error(reason)) => {
                report(&mut done, SegmentEnd::Failed(reason.clone()));
                Some((Err(SwitchError::Upstream(reason)), (rx, done)))
            }
            None => {
                // Already reported: the stream has ended
                let Some(tx) = done.take() else {
                    return None;
                };
                let reason = "Model stream ended without completing".to_string();
                let _ = tx.send(SegmentEnd::Failed(reason.clone()));
                Some((Err(SwitchError::Upstream(reason)), (rx, done)))
            }
        }
    })
    .boxed();

    (source, done_rx)
}

/// Driver task: react to each call's end until the response is complete
async fn drive(
    backend: Arc<dyn LlmBackend>,
    settings: ContinuationSettings,
    mut messages: Vec<ChatMessage>,
    mut switcher: StreamSwitcher,
    mut done: oneshot::Receiver<SegmentEnd>,
) -> RunOutcome {
    let mut segments: u32 = 1;

    loop {
        let Ok(end) = done.await else {
            debug!(segments, "Downstream went away, stopping response");
            switcher.close().await;
            return RunOutcome::Cancelled;
        };

        let (message, finish_reason) = match end {
            SegmentEnd::Failed(reason) => {
                warn!(segments, error = %reason, "Model call failed");
                // The failure was yielded as an error item, ending the downstream
                switcher.close().await;
                return RunOutcome::UpstreamFailed(reason);
            }
            SegmentEnd::Finished {
                message,
                finish_reason,
                usage,
            } => {
                debug!(
                    segments,
                    %finish_reason,
                    completion_tokens = usage.map(|u| u.completion_tokens),
                    "Model call finished"
                );
                (message, finish_reason)
            }
        };

        if !finish_reason.is_truncated() {
            switcher.close().await;
            return RunOutcome::Completed {
                segments,
                finish_reason,
            };
        }

        let switches_left = switcher.switches_left();
        if switches_left == 0 {
            error!(
                segments,
                max_switches = switcher.max_switches(),
                "Cannot continue message: maximum segments reached"
            );
            switcher
                .fail(SwitchError::BudgetExceeded {
                    max: switcher.max_switches(),
                })
                .await;
            return RunOutcome::BudgetExceeded { segments };
        }
        if switcher.is_downstream_dropped() {
            switcher.close().await;
            return RunOutcome::Cancelled;
        }

        info!(
            max_tokens = settings.max_tokens,
            switches_left, "Reached max token limit, continuing message"
        );
        messages.push(ChatMessage::assistant(message));
        messages.push(ChatMessage::user(CONTINUE_PROMPT));

        let rx = match backend.send_streaming(&settings.request(&messages)).await {
            Ok(rx) => rx,
            Err(e) => {
                let reason = e.to_string();
                warn!(segments, error = %reason, "Continuation call failed");
                switcher.fail(SwitchError::Upstream(reason.clone())).await;
                return RunOutcome::UpstreamFailed(reason);
            }
        };

        let (source, next_done) = tap(rx);
        switcher.drain().await;
        if let Err(e) = switcher.switch_source(source).await {
            warn!(error = %e, "Could not switch to continuation source");
            return match e {
                SwitchError::BudgetExceeded { .. } => RunOutcome::BudgetExceeded { segments },
                SwitchError::Closed => RunOutcome::Cancelled,
                SwitchError::Upstream(reason) => RunOutcome::UpstreamFailed(reason),
            };
        }
        done = next_done;
        segments += 1;
    }
}
