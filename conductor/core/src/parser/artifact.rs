//! Artifact, Action, and Parser Event Types

use serde::{Deserialize, Serialize};

use crate::markup::{Attributes, ATTR_ACTIONS, ATTR_FILE_PATH, ATTR_ID, ATTR_PATH, ATTR_TITLE, ATTR_TYPE};
use crate::messages::MessageId;

/// A structured container grouping ordered actions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactData {
    /// Identifier from the `id` attribute
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Declared number of actions, if the model provided one
    pub declared_actions: Option<usize>,
    /// Whether the closing tag has been seen
    pub closed: bool,
}

impl ArtifactData {
    /// Build from the attributes of an `<artifact>` tag
    #[must_use]
    pub fn from_attributes(attrs: &Attributes) -> Self {
        Self {
            id: attrs.get(ATTR_ID).unwrap_or_default().to_string(),
            title: attrs.get(ATTR_TITLE).unwrap_or_default().to_string(),
            declared_actions: attrs
                .get(ATTR_ACTIONS)
                .and_then(|n| n.trim().parse().ok()),
            closed: false,
        }
    }
}

/// What an action does
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Write the content to a file
    File,
    /// Run the content as a shell command
    Shell,
    /// Any other kind the model emits
    Other(String),
}

impl ActionKind {
    /// Parse the `type` attribute
    #[must_use]
    pub fn from_attr(value: &str) -> Self {
        match value.trim() {
            "file" => Self::File,
            "shell" => Self::Shell,
            other => Self::Other(other.to_string()),
        }
    }

    /// Kind name as it appears in markup
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::File => "file",
            Self::Shell => "shell",
            Self::Other(name) => name,
        }
    }

    /// Whether partial content is useful before the action closes
    ///
    /// File contents stream live into an editor. Anything that will be
    /// executed must only be reported once complete.
    #[must_use]
    pub fn streams_content(&self) -> bool {
        matches!(self, Self::File)
    }
}

/// A single directive inside an artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionData {
    /// Action kind
    pub kind: ActionKind,
    /// Target path (file actions)
    pub path: Option<String>,
    /// Content accumulated so far
    pub content: String,
    /// Whether the closing tag has been seen
    pub closed: bool,
}

impl ActionData {
    /// Build from the attributes of an `<action>` tag
    #[must_use]
    pub fn from_attributes(attrs: &Attributes) -> Self {
        let kind = attrs
            .get(ATTR_TYPE)
            .map_or_else(|| ActionKind::Other(String::new()), ActionKind::from_attr);
        let path = match kind {
            ActionKind::Shell => None,
            _ => attrs
                .get_any(&[ATTR_PATH, ATTR_FILE_PATH])
                .map(str::to_string),
        };

        Self {
            kind,
            path,
            content: String::new(),
            closed: false,
        }
    }
}

/// Semantic events raised by the parser, in document order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParserEvent {
    /// An artifact opening tag was recognized
    ArtifactOpen {
        /// Turn the artifact belongs to
        message_id: MessageId,
        /// The artifact as declared
        artifact: ArtifactData,
    },
    /// An artifact was closed
    ArtifactClose {
        /// Turn the artifact belongs to
        message_id: MessageId,
        /// The final artifact
        artifact: ArtifactData,
    },
    /// An action became visible
    ///
    /// For streaming kinds this fires at the opening tag with empty content;
    /// for atomic kinds it fires together with [`ParserEvent::ActionClose`].
    ActionOpen {
        /// Turn the action belongs to
        message_id: MessageId,
        /// Owning artifact
        artifact_id: String,
        /// Per-turn action index
        action_id: usize,
        /// The action as known at this point
        action: ActionData,
    },
    /// More content arrived for an open streaming action
    ActionContent {
        /// Turn the action belongs to
        message_id: MessageId,
        /// Owning artifact
        artifact_id: String,
        /// Per-turn action index
        action_id: usize,
        /// Newly arrived content
        chunk: String,
    },
    /// An action was closed with its complete content
    ActionClose {
        /// Turn the action belongs to
        message_id: MessageId,
        /// Owning artifact
        artifact_id: String,
        /// Per-turn action index
        action_id: usize,
        /// The complete action
        action: ActionData,
    },
}

impl ParserEvent {
    /// Turn this event belongs to
    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::ArtifactOpen { message_id, .. }
            | Self::ArtifactClose { message_id, .. }
            | Self::ActionOpen { message_id, .. }
            | Self::ActionContent { message_id, .. }
            | Self::ActionClose { message_id, .. } => message_id,
        }
    }
}
