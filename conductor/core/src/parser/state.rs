//! Per-Turn Parse State Machine
//!
//! ```text
//!            <artifact>              <action>
//!   Idle ───────────────▶ ArtifactOpen ─────────▶ ActionOpen
//!    ▲                     │       ▲                  │
//!    └─────────────────────┘       └──────────────────┘
//!          </artifact>                  </action>
//! ```
//!
//! Transitions happen only on recognized tags. There are no timeouts; an
//! unfinished element simply waits for more text.

use tracing::{debug, trace, warn};

use super::artifact::{ActionData, ArtifactData, ParserEvent};
use super::ParseOutput;
use crate::markup::{ScanMode, TagName, TagScanner, Token};
use crate::messages::MessageId;

/// Where a turn currently sits in the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsePhase {
    /// Outside any artifact; text goes to the cleaned output
    Idle,
    /// Inside an artifact, between actions
    ArtifactOpen,
    /// Inside an action body
    ActionOpen,
}

#[derive(Debug)]
struct OpenAction {
    id: usize,
    data: ActionData,
    /// Whether `ActionOpen` has been emitted yet
    announced: bool,
    /// Content received during the current call, not yet reported
    pending: String,
}

/// Parser state for one turn
#[derive(Debug, Default)]
pub struct ParseState {
    cursor: usize,
    cleaned: String,
    open_artifact: Option<ArtifactData>,
    open_action: Option<OpenAction>,
    next_action_id: usize,
}

impl ParseState {
    /// Create an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the cumulative text already consumed
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Cleaned projection produced so far
    #[must_use]
    pub fn cleaned(&self) -> &str {
        &self.cleaned
    }

    /// Current state machine phase
    #[must_use]
    pub fn phase(&self) -> ParsePhase {
        match (&self.open_artifact, &self.open_action) {
            (_, Some(_)) => ParsePhase::ActionOpen,
            (Some(_), None) => ParsePhase::ArtifactOpen,
            (None, None) => ParsePhase::Idle,
        }
    }

    /// Whether an artifact is open
    #[must_use]
    pub fn inside_artifact(&self) -> bool {
        self.open_artifact.is_some()
    }

    /// Whether an action is open
    #[must_use]
    pub fn inside_action(&self) -> bool {
        self.open_action.is_some()
    }

    fn scan_mode(&self) -> ScanMode {
        if self.inside_action() {
            ScanMode::ActionBody
        } else {
            ScanMode::Markup
        }
    }

    /// Consume the unscanned suffix of `text`
    pub fn advance(&mut self, message_id: &MessageId, text: &str) -> ParseOutput {
        let start_len = self.cleaned.len();
        let mut events = Vec::new();

        if text.len() < self.cursor || !text.is_char_boundary(self.cursor) {
            warn!(
                message_id = %message_id,
                cursor = self.cursor,
                len = text.len(),
                "Cumulative text does not extend the parsed prefix, ignoring"
            );
            return self.output(start_len, events);
        }

        let mut scanner = TagScanner::new(text, self.cursor, self.scan_mode());
        while let Some(token) = scanner.next() {
            self.apply(message_id, text, token, &mut events);
            scanner.set_mode(self.scan_mode());
        }
        self.cursor = scanner.cursor();
        self.flush_pending(message_id, &mut events);

        self.output(start_len, events)
    }

    /// Consume the rest of `text` as final input
    ///
    /// A held-back incomplete tag outside an artifact becomes plain text.
    /// Elements still open stay open; no close events are synthesized.
    pub fn finish(&mut self, message_id: &MessageId, text: &str) -> ParseOutput {
        let start_len = self.cleaned.len();
        let mut output = self.advance(message_id, text);

        if self.cursor < text.len() {
            let tail = &text[self.cursor..];
            match self.phase() {
                ParsePhase::Idle => self.cleaned.push_str(tail),
                phase => debug!(
                    message_id = %message_id,
                    ?phase,
                    dropped = tail.len(),
                    "Turn finished inside an open element"
                ),
            }
            self.cursor = text.len();
        }

        output.text = self.cleaned.clone();
        output.appended = self.cleaned[start_len..].to_string();
        output
    }

    fn output(&self, start_len: usize, events: Vec<ParserEvent>) -> ParseOutput {
        ParseOutput {
            text: self.cleaned.clone(),
            appended: self.cleaned[start_len..].to_string(),
            events,
        }
    }

    fn apply(
        &mut self,
        message_id: &MessageId,
        text: &str,
        token: Token,
        events: &mut Vec<ParserEvent>,
    ) {
        match token {
            Token::Text(range) => self.on_text(&text[range]),
            Token::OpenTag {
                name: TagName::Artifact,
                attributes,
                self_closing,
                range: _,
            } => {
                if self.inside_artifact() {
                    trace!(message_id = %message_id, "Ignoring nested artifact tag");
                    return;
                }
                let artifact = ArtifactData::from_attributes(&attributes);
                debug!(message_id = %message_id, artifact_id = %artifact.id, "Artifact opened");
                events.push(ParserEvent::ArtifactOpen {
                    message_id: message_id.clone(),
                    artifact: artifact.clone(),
                });
                self.open_artifact = Some(artifact);
                if self_closing {
                    self.close_artifact(message_id, events);
                }
            }
            Token::OpenTag {
                name: TagName::Action,
                attributes,
                self_closing,
                range,
            } => {
                let Some(artifact_id) = self.open_artifact.as_ref().map(|a| a.id.clone()) else {
                    // Actions only mean something inside an artifact
                    self.cleaned.push_str(&text[range]);
                    return;
                };
                let data = ActionData::from_attributes(&attributes);
                let id = self.next_action_id;
                self.next_action_id += 1;

                let announced = data.kind.streams_content();
                if announced {
                    debug!(
                        message_id = %message_id,
                        artifact_id = %artifact_id,
                        action_id = id,
                        kind = data.kind.as_str(),
                        "Action opened"
                    );
                    events.push(ParserEvent::ActionOpen {
                        message_id: message_id.clone(),
                        artifact_id,
                        action_id: id,
                        action: data.clone(),
                    });
                }
                self.open_action = Some(OpenAction {
                    id,
                    data,
                    announced,
                    pending: String::new(),
                });
                if self_closing {
                    self.close_action(message_id, events);
                }
            }
            Token::CloseTag {
                name: TagName::Action,
                range,
            } => match self.phase() {
                ParsePhase::ActionOpen => self.close_action(message_id, events),
                ParsePhase::ArtifactOpen => {
                    trace!(message_id = %message_id, "Ignoring unmatched action close");
                }
                ParsePhase::Idle => self.cleaned.push_str(&text[range]),
            },
            Token::CloseTag {
                name: TagName::Artifact,
                range,
            } => match self.phase() {
                ParsePhase::ArtifactOpen => self.close_artifact(message_id, events),
                // Unreachable in action-body scan mode
                ParsePhase::ActionOpen => {}
                ParsePhase::Idle => self.cleaned.push_str(&text[range]),
            },
        }
    }

    fn on_text(&mut self, chunk: &str) {
        match (&mut self.open_action, &self.open_artifact) {
            (Some(action), _) => {
                action.data.content.push_str(chunk);
                if action.announced {
                    action.pending.push_str(chunk);
                }
            }
            // Whitespace and chatter between actions
            (None, Some(_)) => {}
            (None, None) => self.cleaned.push_str(chunk),
        }
    }

    fn flush_pending(&mut self, message_id: &MessageId, events: &mut Vec<ParserEvent>) {
        let Some(action) = self.open_action.as_mut() else {
            return;
        };
        if action.pending.is_empty() {
            return;
        }
        let artifact_id = self
            .open_artifact
            .as_ref()
            .map(|a| a.id.clone())
            .unwrap_or_default();
        events.push(ParserEvent::ActionContent {
            message_id: message_id.clone(),
            artifact_id,
            action_id: action.id,
            chunk: std::mem::take(&mut action.pending),
        });
    }

    fn close_action(&mut self, message_id: &MessageId, events: &mut Vec<ParserEvent>) {
        self.flush_pending(message_id, events);
        let Some(mut action) = self.open_action.take() else {
            return;
        };
        let artifact_id = self
            .open_artifact
            .as_ref()
            .map(|a| a.id.clone())
            .unwrap_or_default();
        action.data.closed = true;

        if !action.announced {
            events.push(ParserEvent::ActionOpen {
                message_id: message_id.clone(),
                artifact_id: artifact_id.clone(),
                action_id: action.id,
                action: action.data.clone(),
            });
        }
        debug!(
            message_id = %message_id,
            artifact_id = %artifact_id,
            action_id = action.id,
            kind = action.data.kind.as_str(),
            bytes = action.data.content.len(),
            "Action closed"
        );
        events.push(ParserEvent::ActionClose {
            message_id: message_id.clone(),
            artifact_id,
            action_id: action.id,
            action: action.data,
        });
    }

    fn close_artifact(&mut self, message_id: &MessageId, events: &mut Vec<ParserEvent>) {
        let Some(mut artifact) = self.open_artifact.take() else {
            return;
        };
        artifact.closed = true;
        debug!(message_id = %message_id, artifact_id = %artifact.id, "Artifact closed");
        events.push(ParserEvent::ArtifactClose {
            message_id: message_id.clone(),
            artifact,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let id = MessageId::from("m");
        let mut state = ParseState::new();
        assert_eq!(state.phase(), ParsePhase::Idle);

        state.advance(&id, r#"<artifact id="a">"#);
        assert_eq!(state.phase(), ParsePhase::ArtifactOpen);
        assert!(state.inside_artifact());

        state.advance(&id, r#"<artifact id="a"><action type="file" path="p">x"#);
        assert_eq!(state.phase(), ParsePhase::ActionOpen);
        assert!(state.inside_action());

        state.advance(&id, r#"<artifact id="a"><action type="file" path="p">x</action>"#);
        assert_eq!(state.phase(), ParsePhase::ArtifactOpen);

        let text = r#"<artifact id="a"><action type="file" path="p">x</action></artifact>"#;
        state.advance(&id, text);
        assert_eq!(state.phase(), ParsePhase::Idle);
        assert_eq!(state.cursor(), text.len());
    }

    #[test]
    fn test_shrinking_input_is_ignored() {
        let id = MessageId::from("m");
        let mut state = ParseState::new();
        state.advance(&id, "hello world");

        let output = state.advance(&id, "hello");
        assert_eq!(output.text, "hello world");
        assert!(output.appended.is_empty());
        assert!(output.events.is_empty());
        assert_eq!(state.cursor(), 11);
    }

    #[test]
    fn test_finish_flushes_held_tail() {
        let id = MessageId::from("m");
        let mut state = ParseState::new();
        let output = state.advance(&id, "a <art");
        assert_eq!(output.text, "a ");

        let output = state.finish(&id, "a <art");
        assert_eq!(output.text, "a <art");
        assert_eq!(output.appended, "<art");
    }

    #[test]
    fn test_finish_inside_action_emits_no_close() {
        let id = MessageId::from("m");
        let mut state = ParseState::new();
        let output = state.finish(&id, r#"<artifact id="a"><action type="shell">npm i</act"#);

        assert!(output
            .events
            .iter()
            .all(|e| !matches!(e, ParserEvent::ActionClose { .. } | ParserEvent::ActionOpen { .. })));
        assert_eq!(output.text, "");
    }
}
