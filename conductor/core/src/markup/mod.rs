//! Artifact Markup Vocabulary and Scanner
//!
//! The model embeds structured directives in its text response using a small,
//! fixed set of tags:
//!
//! ```text
//! <artifact id="todo-app" title="Todo App" actions="2">
//!   <action type="file" path="src/main.rs">fn main() {}</action>
//!   <action type="shell">cargo run</action>
//! </artifact>
//! ```
//!
//! Anything outside this vocabulary is ordinary text and is passed through
//! untouched. This module only knows about tag *boundaries*; what the tags
//! mean is decided by [`crate::parser`].
//!
//! # Module Structure
//!
//! - [`scanner`]: Restartable lexer over a growing text buffer

pub mod scanner;

pub use scanner::{ScanMode, TagScanner, Token};

/// Attribute key carrying the artifact identifier
pub const ATTR_ID: &str = "id";
/// Attribute key carrying the artifact title
pub const ATTR_TITLE: &str = "title";
/// Attribute key carrying the declared number of actions in an artifact
pub const ATTR_ACTIONS: &str = "actions";
/// Attribute key carrying the action kind
pub const ATTR_TYPE: &str = "type";
/// Attribute key carrying the target path of a file action
pub const ATTR_PATH: &str = "path";
/// Alternate spelling of [`ATTR_PATH`] emitted by some prompts
pub const ATTR_FILE_PATH: &str = "filePath";

/// The tags the scanner recognizes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagName {
    /// `<artifact>` container
    Artifact,
    /// `<action>` directive inside an artifact
    Action,
}

impl TagName {
    /// Every recognized tag, in matching order
    pub const ALL: [TagName; 2] = [TagName::Artifact, TagName::Action];

    /// The literal tag name as it appears in markup
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artifact => "artifact",
            Self::Action => "action",
        }
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes parsed from an opening tag, in source order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    /// Create an empty attribute list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute (later duplicates do not shadow earlier ones)
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Look up the first attribute with the given key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up the first present key among several spellings
    #[must_use]
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    /// Number of attributes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no attributes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
