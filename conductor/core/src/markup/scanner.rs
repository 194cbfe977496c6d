//! Tag Scanner
//!
//! Lexes the cumulative text of one turn into boundary tokens, starting at a
//! resume cursor. The scanner never looks behind its cursor, so a caller that
//! persists [`TagScanner::cursor`] between calls scans every byte once.
//!
//! When the buffer ends inside something that may still become a recognized
//! tag (`<arti`, `</action`, `<action type="fi`), the scanner stops *before*
//! the `<` and reports itself stalled. The caller re-invokes it once more text
//! has arrived.

use std::ops::Range;

use super::{Attributes, TagName};

/// Which tags the scanner is allowed to recognize
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanMode {
    /// Recognize every tag in the vocabulary
    #[default]
    Markup,
    /// Inside an action body: only `</action>` ends the text run
    ActionBody,
}

/// A boundary token. Ranges are byte offsets into the scanned text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// A run of plain text
    Text(Range<usize>),
    /// A recognized opening tag
    OpenTag {
        /// Which tag
        name: TagName,
        /// Parsed attributes
        attributes: Attributes,
        /// Whether the tag ended with `/>`
        self_closing: bool,
        /// Span of the whole tag, `<` through `>`
        range: Range<usize>,
    },
    /// A recognized closing tag
    CloseTag {
        /// Which tag
        name: TagName,
        /// Span of the whole tag, `</` through `>`
        range: Range<usize>,
    },
}

impl Token {
    /// Byte span covered by this token
    #[must_use]
    pub fn range(&self) -> &Range<usize> {
        match self {
            Self::Text(range) | Self::OpenTag { range, .. } | Self::CloseTag { range, .. } => range,
        }
    }
}

/// Result of trying to read a tag at a `<`
enum TagMatch {
    Complete(Token),
    /// Could still become a recognized tag once more text arrives
    Incomplete,
    NotATag,
}

/// Restartable lexer over a growing text buffer
pub struct TagScanner<'a> {
    text: &'a str,
    cursor: usize,
    mode: ScanMode,
    stalled: bool,
}

impl<'a> TagScanner<'a> {
    /// Start scanning `text` at `cursor`
    ///
    /// A cursor past the end of `text` is clamped to its length.
    #[must_use]
    pub fn new(text: &'a str, cursor: usize, mode: ScanMode) -> Self {
        Self {
            text,
            cursor: cursor.min(text.len()),
            mode,
            stalled: false,
        }
    }

    /// Position the next scan resumes from
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Current scan mode
    #[must_use]
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Switch scan mode; takes effect on the next token
    pub fn set_mode(&mut self, mode: ScanMode) {
        self.mode = mode;
    }

    /// Whether scanning stopped in front of an incomplete tag
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Text from the cursor to the end of the buffer
    #[must_use]
    pub fn remainder(&self) -> &'a str {
        &self.text[self.cursor..]
    }

    fn emit_text(&mut self, end: usize) -> Token {
        let token = Token::Text(self.cursor..end);
        self.cursor = end;
        token
    }

    fn next_markup(&mut self) -> Option<Token> {
        let rest = &self.text[self.cursor..];
        let Some(offset) = rest.find('<') else {
            return Some(self.emit_text(self.text.len()));
        };
        if offset > 0 {
            return Some(self.emit_text(self.cursor + offset));
        }

        match match_tag(self.text, self.cursor, None) {
            TagMatch::Complete(token) => {
                self.cursor = token.range().end;
                Some(token)
            }
            TagMatch::Incomplete => {
                self.stalled = true;
                None
            }
            TagMatch::NotATag => {
                let end = rest[1..]
                    .find('<')
                    .map_or(self.text.len(), |i| self.cursor + 1 + i);
                Some(self.emit_text(end))
            }
        }
    }

    fn next_action_body(&mut self) -> Option<Token> {
        let mut search_from = self.cursor;
        loop {
            let Some(offset) = self.text[search_from..].find('<') else {
                return Some(self.emit_text(self.text.len()));
            };
            let at = search_from + offset;

            match match_tag(self.text, at, Some(TagName::Action)) {
                TagMatch::NotATag => search_from = at + 1,
                TagMatch::Complete(token) if at == self.cursor => {
                    self.cursor = token.range().end;
                    return Some(token);
                }
                TagMatch::Incomplete if at == self.cursor => {
                    self.stalled = true;
                    return None;
                }
                // Hand out the content in front of the tag first
                TagMatch::Complete(_) | TagMatch::Incomplete => return Some(self.emit_text(at)),
            }
        }
    }
}

impl Iterator for TagScanner<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.stalled || self.cursor >= self.text.len() {
            return None;
        }
        match self.mode {
            ScanMode::Markup => self.next_markup(),
            ScanMode::ActionBody => self.next_action_body(),
        }
    }
}

/// Try to read a tag starting at `text[start] == '<'`
///
/// With `close_only` set, only the closing form of that tag is recognized.
fn match_tag(text: &str, start: usize, close_only: Option<TagName>) -> TagMatch {
    let s = &text[start..];
    let closing = s.starts_with("</");

    if close_only.is_some() && !closing {
        // A lone trailing '<' may still turn into "</"
        return if s.len() == 1 {
            TagMatch::Incomplete
        } else {
            TagMatch::NotATag
        };
    }

    let name_start = if closing { 2 } else { 1 };
    let body = &s[name_start..];
    let mut partial = false;

    for name in TagName::ALL
        .into_iter()
        .filter(|n| close_only.map_or(true, |only| only == *n))
    {
        let literal = name.as_str();
        if body.len() < literal.len() {
            if literal.starts_with(body) {
                partial = true;
            }
            continue;
        }
        if !body.starts_with(literal) {
            continue;
        }

        match body[literal.len()..].chars().next() {
            None => partial = true,
            Some(c) if c == '>' || c.is_ascii_whitespace() || (c == '/' && !closing) => {
                let after_name = start + name_start + literal.len();
                return finish_tag(text, start, after_name, name, closing);
            }
            // e.g. "<artifacts" or "<actionable"
            Some(_) => {}
        }
    }

    if partial {
        TagMatch::Incomplete
    } else {
        TagMatch::NotATag
    }
}

fn finish_tag(text: &str, start: usize, after_name: usize, name: TagName, closing: bool) -> TagMatch {
    let Some(rel_end) = find_tag_end(&text[after_name..]) else {
        return TagMatch::Incomplete;
    };
    let gt = after_name + rel_end;
    let range = start..gt + 1;

    if closing {
        return TagMatch::Complete(Token::CloseTag { name, range });
    }

    let inner = text[after_name..gt].trim_end();
    let (inner, self_closing) = match inner.strip_suffix('/') {
        Some(rest) => (rest, true),
        None => (inner, false),
    };

    TagMatch::Complete(Token::OpenTag {
        name,
        attributes: parse_attributes(inner),
        self_closing,
        range,
    })
}

/// Offset of the `>` that ends a tag, skipping quoted attribute values
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '>') => return Some(i),
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    None
}

/// Parse `key="value" key='value' key=value key` sequences
fn parse_attributes(s: &str) -> Attributes {
    let mut attrs = Attributes::new();
    let mut rest = s.trim_start();

    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_end];
        rest = rest[key_end..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            if !key.is_empty() {
                attrs.push(key, "");
            }
            continue;
        };

        let after_eq = after_eq.trim_start();
        let (value, remaining) = match after_eq.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let quoted = &after_eq[1..];
                match quoted.find(q) {
                    Some(end) => (&quoted[..end], &quoted[end + 1..]),
                    None => (quoted, ""),
                }
            }
            _ => {
                let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };

        if !key.is_empty() {
            attrs.push(key, value);
        }
        rest = remaining.trim_start();
    }

    attrs
}
