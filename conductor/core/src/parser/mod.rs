//! Incremental Artifact/Action Parser
//!
//! Consumes the cumulative text of each assistant turn as it streams in and
//! turns embedded artifact markup into ordered [`ParserEvent`]s, alongside a
//! display-safe projection of the text with the markup removed.
//!
//! # Architecture
//!
//! ```text
//! cumulative text ──▶ TagScanner ──▶ ParseState (per turn) ──▶ ParseOutput
//!                    (from cursor)                             ├─ text
//!                                                              ├─ appended
//!                                                              └─ events
//! ```
//!
//! # Design Philosophy
//!
//! - **Scan once**: each call scans only bytes past the turn's cursor
//! - **Decide once**: every element is reported exactly once, in the call
//!   that first makes it unambiguous
//! - **Never fail**: malformed or unknown markup degrades to plain text
//! - **Explicit lifetime**: state is created on first use and removed by
//!   [`MessageParser::finish`], [`MessageParser::dispose`] or
//!   [`MessageParser::reset`]

pub mod artifact;
pub mod state;

pub use artifact::{ActionData, ActionKind, ArtifactData, ParserEvent};
pub use state::{ParsePhase, ParseState};

use dashmap::DashMap;
use tracing::debug;

use crate::messages::MessageId;

/// Result of one parse call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseOutput {
    /// Cleaned projection of everything parsed so far for the turn
    ///
    /// Callers replace their rendered text with this value.
    pub text: String,
    /// Suffix of `text` produced by this call alone
    pub appended: String,
    /// Events decided by this call, in document order
    pub events: Vec<ParserEvent>,
}

/// Per-turn incremental parser
///
/// Turns are independent: concurrent calls for different message IDs never
/// share state. Calls for the same message ID are serialized by the map.
#[derive(Debug, Default)]
pub struct MessageParser {
    states: DashMap<MessageId, ParseState>,
}

impl MessageParser {
    /// Create a parser with no active turns
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the cumulative text of a turn
    ///
    /// `text` must extend the text given in earlier calls for the same
    /// `message_id`. Only the unconsumed suffix is scanned.
    pub fn parse(&self, message_id: &MessageId, text: &str) -> ParseOutput {
        self.states
            .entry(message_id.clone())
            .or_default()
            .advance(message_id, text)
    }

    /// Parse the final text of a turn and drop its state
    ///
    /// Anything held back as a possible tag outside an artifact is released
    /// as plain text.
    pub fn finish(&self, message_id: &MessageId, text: &str) -> ParseOutput {
        let (_, mut state) = self
            .states
            .remove(message_id)
            .unwrap_or_else(|| (message_id.clone(), ParseState::new()));
        let output = state.finish(message_id, text);
        debug!(
            message_id = %message_id,
            events = output.events.len(),
            cleaned = output.text.len(),
            "Turn finished"
        );
        output
    }

    /// Drop the state of one turn
    ///
    /// Returns whether the turn had state.
    pub fn dispose(&self, message_id: &MessageId) -> bool {
        self.states.remove(message_id).is_some()
    }

    /// Drop the state of every turn
    pub fn reset(&self) {
        let count = self.states.len();
        self.states.clear();
        debug!(turns = count, "Parser reset");
    }

    /// Number of turns with live state
    #[must_use]
    pub fn active_turns(&self) -> usize {
        self.states.len()
    }

    /// Phase of a turn, if it has state
    #[must_use]
    pub fn phase(&self, message_id: &MessageId) -> Option<ParsePhase> {
        self.states.get(message_id).map(|state| state.phase())
    }

    /// Cursor of a turn, if it has state
    #[must_use]
    pub fn cursor(&self, message_id: &MessageId) -> Option<usize> {
        self.states.get(message_id).map(|state| state.cursor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DEMO: &str =
        r#"<artifact id="a1" title="Demo"><action type="file" path="x.txt">hello</action></artifact>"#;

    fn names(events: &[ParserEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                ParserEvent::ArtifactOpen { .. } => "artifact_open",
                ParserEvent::ArtifactClose { .. } => "artifact_close",
                ParserEvent::ActionOpen { .. } => "action_open",
                ParserEvent::ActionContent { .. } => "action_content",
                ParserEvent::ActionClose { .. } => "action_close",
            })
            .collect()
    }

    #[test]
    fn test_three_chunk_file_action() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");

        // Split mid-tag, then mid-content
        let cut1 = DEMO.find("path=").unwrap() + 3;
        let cut2 = DEMO.find("hello").unwrap() + 3;

        let first = parser.parse(&id, &DEMO[..cut1]);
        assert_eq!(names(&first.events), vec!["artifact_open"]);
        match &first.events[0] {
            ParserEvent::ArtifactOpen { artifact, .. } => {
                assert_eq!(artifact.id, "a1");
                assert_eq!(artifact.title, "Demo");
            }
            other => panic!("Expected artifact open, got {other:?}"),
        }

        let second = parser.parse(&id, &DEMO[..cut2]);
        assert_eq!(names(&second.events), vec!["action_open", "action_content"]);
        match (&second.events[0], &second.events[1]) {
            (
                ParserEvent::ActionOpen { action, .. },
                ParserEvent::ActionContent { chunk, .. },
            ) => {
                assert_eq!(action.kind, ActionKind::File);
                assert_eq!(action.path.as_deref(), Some("x.txt"));
                assert!(action.content.is_empty());
                assert_eq!(chunk, "hel");
            }
            other => panic!("Unexpected events {other:?}"),
        }

        let third = parser.parse(&id, DEMO);
        assert_eq!(
            names(&third.events),
            vec!["action_content", "action_close", "artifact_close"]
        );
        match (&third.events[0], &third.events[1], &third.events[2]) {
            (
                ParserEvent::ActionContent { chunk, .. },
                ParserEvent::ActionClose { action, .. },
                ParserEvent::ArtifactClose { artifact, .. },
            ) => {
                assert_eq!(chunk, "lo");
                assert_eq!(action.content, "hello");
                assert!(action.closed);
                assert!(artifact.closed);
            }
            other => panic!("Unexpected events {other:?}"),
        }

        assert_eq!(third.text, "");
        assert_eq!(parser.phase(&id), Some(ParsePhase::Idle));
    }

    #[test]
    fn test_surrounding_text_is_preserved() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");
        let text = format!("Here you go:\n{DEMO}\nDone.");

        let output = parser.parse(&id, &text);
        assert_eq!(output.text, "Here you go:\n\nDone.");
        assert_eq!(output.events.len(), 5);
    }

    #[test]
    fn test_shell_action_is_atomic() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");
        let text = r#"<artifact id="a"><action type="shell">npm install && npm run dev</action></artifact>"#;
        let cut = text.find("&&").unwrap();

        let partial = parser.parse(&id, &text[..cut]);
        assert_eq!(names(&partial.events), vec!["artifact_open"]);

        let rest = parser.parse(&id, text);
        assert_eq!(
            names(&rest.events),
            vec!["action_open", "action_close", "artifact_close"]
        );
        match &rest.events[0] {
            ParserEvent::ActionOpen { action, .. } => {
                assert_eq!(action.content, "npm install && npm run dev");
                assert_eq!(action.kind, ActionKind::Shell);
            }
            other => panic!("Expected action open, got {other:?}"),
        }
    }

    #[test]
    fn test_action_ids_are_sequential_per_turn() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");
        let text = r#"<artifact id="a"><action type="file" path="a">1</action><action type="shell">ls</action></artifact>"#;

        let output = parser.parse(&id, text);
        let ids: Vec<usize> = output
            .events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::ActionClose { action_id, .. } => Some(*action_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_action_outside_artifact_is_text() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");
        let text = r#"use <action type="shell">ls</action> here"#;

        let output = parser.parse(&id, text);
        assert_eq!(output.text, text);
        assert!(output.events.is_empty());
    }

    #[test]
    fn test_unmatched_closes_are_tolerated() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");

        let output = parser.parse(&id, "a</artifact>b");
        assert_eq!(output.text, "a</artifact>b");
        assert!(output.events.is_empty());

        let id2 = MessageId::from("turn-2");
        let output = parser.parse(&id2, r#"<artifact id="x"></action></artifact>"#);
        assert_eq!(names(&output.events), vec!["artifact_open", "artifact_close"]);
    }

    #[test]
    fn test_nested_artifact_is_ignored() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");
        let output = parser.parse(
            &id,
            r#"<artifact id="outer"><artifact id="inner"></artifact>after"#,
        );

        assert_eq!(names(&output.events), vec!["artifact_open", "artifact_close"]);
        assert_eq!(output.text, "after");
    }

    #[test]
    fn test_turns_are_isolated() {
        let parser = MessageParser::new();
        let a = MessageId::from("a");
        let b = MessageId::from("b");

        parser.parse(&a, r#"<artifact id="x">"#);
        let other = parser.parse(&b, "plain");
        assert_eq!(other.text, "plain");
        assert_eq!(parser.phase(&a), Some(ParsePhase::ArtifactOpen));
        assert_eq!(parser.phase(&b), Some(ParsePhase::Idle));
        assert_eq!(parser.active_turns(), 2);
    }

    #[test]
    fn test_appended_tracks_growth() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");

        let first = parser.parse(&id, "Hello ");
        assert_eq!(first.appended, "Hello ");
        let second = parser.parse(&id, "Hello world");
        assert_eq!(second.text, "Hello world");
        assert_eq!(second.appended, "world");
        let third = parser.parse(&id, "Hello world");
        assert!(third.appended.is_empty());
        assert!(third.events.is_empty());
    }

    #[test]
    fn test_finish_disposes_state() {
        let parser = MessageParser::new();
        let id = MessageId::from("turn-1");

        parser.parse(&id, "x <arti");
        let output = parser.finish(&id, "x <arti");
        assert_eq!(output.text, "x <arti");
        assert_eq!(parser.active_turns(), 0);
        assert_eq!(parser.phase(&id), None);
    }

    #[test]
    fn test_dispose_and_reset() {
        let parser = MessageParser::new();
        let a = MessageId::from("a");
        let b = MessageId::from("b");
        parser.parse(&a, "one");
        parser.parse(&b, "two");

        assert!(parser.dispose(&a));
        assert!(!parser.dispose(&a));
        assert_eq!(parser.active_turns(), 1);

        parser.reset();
        assert_eq!(parser.active_turns(), 0);

        // A reset turn starts over from the beginning
        let output = parser.parse(&b, "two");
        assert_eq!(output.appended, "two");
    }
}
