//! Edit IR: byte-range edits over an immutable source buffer.
//!
//! Rewriting a module never mutates its source in place. Every fact that
//! needs a change contributes an [`Edit`] to an [`EditSet`], and the set is
//! applied once:
//!
//! - Edits are ordered by position; ties keep collection order.
//! - Inserts at a shared offset concatenate in collection order and land
//!   before a replace starting at the same offset.
//! - Two replaces never overlap. This is an engine invariant; it is checked
//!   with `debug_assert!` only.
//!
//! Statement ranges handed over by the fact extractor are terminator-exclusive:
//! they stop before the trailing `;`. [`EditSet::clear_statement`] removes a
//! single directly following `;` as part of the same replace.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::byte_offset_to_position;

// ============================================================================
// Span
// ============================================================================

/// Byte offsets into a module's original text.
///
/// Spans are half-open intervals: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    ///
    /// # Panics
    /// Panics if `start > end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(
            start <= end,
            "Span start ({}) must be <= end ({})",
            start,
            end
        );
        Span { start, end }
    }

    /// An empty span at `pos`.
    pub fn at(pos: usize) -> Self {
        Span {
            start: pos,
            end: pos,
        }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Two spans overlap if they share any byte. Adjacent spans do not.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check if this span contains another span entirely.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Edits
// ============================================================================

/// Which fact produced an edit. Used for provenance in materialized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOrigin {
    /// Module preamble (global binding import).
    Header,
    Require,
    Provide,
    Usage,
    Define,
    /// Trailing export statement.
    Export,
}

/// The operation an edit performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditKind {
    /// Insert `text` at byte offset `pos`.
    InsertAt { pos: usize, text: String },
    /// Replace the bytes in `span` with `text` (empty text deletes).
    Replace { span: Span, text: String },
}

/// A single edit against a module's original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    /// Collection index, stable tie-breaker for ordering.
    pub id: u32,
    pub kind: EditKind,
    pub origin: EditOrigin,
}

impl Edit {
    /// Position the edit is ordered by.
    pub fn position(&self) -> usize {
        match &self.kind {
            EditKind::InsertAt { pos, .. } => *pos,
            EditKind::Replace { span, .. } => span.start,
        }
    }

    /// Range of original text the edit consumes (empty for inserts).
    pub fn span(&self) -> Span {
        match &self.kind {
            EditKind::InsertAt { pos, .. } => Span::at(*pos),
            EditKind::Replace { span, .. } => *span,
        }
    }

    /// Replacement or inserted text.
    pub fn text(&self) -> &str {
        match &self.kind {
            EditKind::InsertAt { text, .. } | EditKind::Replace { text, .. } => text,
        }
    }

    fn is_insert(&self) -> bool {
        matches!(self.kind, EditKind::InsertAt { .. })
    }
}

/// Errors raised when an edit addresses text that does not exist.
///
/// These indicate a broken fact-extraction contract, not a user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// The span reaches past the end of the source.
    #[error("span {span} is out of bounds for source of {len} bytes")]
    OutOfBounds { span: Span, len: usize },

    /// The span ends before it starts.
    #[error("span {span} ends before it starts")]
    Inverted { span: Span },

    /// The span boundary splits a UTF-8 character.
    #[error("span {span} does not fall on character boundaries")]
    NotCharBoundary { span: Span },
}

// ============================================================================
// EditSet
// ============================================================================

/// A piece of output text and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// Output bytes copied verbatim from `original` onwards.
    Copied { out: usize, original: usize, len: usize },
    /// Output bytes produced by an edit positioned at `original`.
    Generated { out: usize, original: usize, len: usize },
}

/// Result of applying an [`EditSet`].
#[derive(Debug, Clone)]
pub struct Applied {
    /// The rewritten text.
    pub code: String,
    /// Provenance of every output byte, in output order.
    pub chunks: Vec<Chunk>,
}

/// An ordered batch of edits against one source text.
#[derive(Debug, Clone)]
pub struct EditSet<'a> {
    source: &'a str,
    edits: Vec<Edit>,
}

impl<'a> EditSet<'a> {
    /// Create an empty set over `source`.
    pub fn new(source: &'a str) -> Self {
        EditSet {
            source,
            edits: Vec::new(),
        }
    }

    /// The original text.
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Edits in collection order.
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// Returns true if no edits were collected.
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Number of collected edits.
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    fn check(&self, span: Span) -> Result<(), EditError> {
        if span.start > span.end {
            return Err(EditError::Inverted { span });
        }
        if span.end > self.source.len() {
            return Err(EditError::OutOfBounds {
                span,
                len: self.source.len(),
            });
        }
        if !self.source.is_char_boundary(span.start) || !self.source.is_char_boundary(span.end) {
            return Err(EditError::NotCharBoundary { span });
        }
        Ok(())
    }

    fn push(&mut self, kind: EditKind, origin: EditOrigin) {
        let id = self.edits.len() as u32;
        self.edits.push(Edit { id, kind, origin });
    }

    /// Insert text at `pos`.
    pub fn insert(
        &mut self,
        pos: usize,
        text: impl Into<String>,
        origin: EditOrigin,
    ) -> Result<(), EditError> {
        self.check(Span::at(pos))?;
        self.push(
            EditKind::InsertAt {
                pos,
                text: text.into(),
            },
            origin,
        );
        Ok(())
    }

    /// Append text after the end of the source.
    pub fn append(&mut self, text: impl Into<String>, origin: EditOrigin) {
        let pos = self.source.len();
        self.push(
            EditKind::InsertAt {
                pos,
                text: text.into(),
            },
            origin,
        );
    }

    /// Replace `span` with text.
    pub fn replace(
        &mut self,
        span: Span,
        text: impl Into<String>,
        origin: EditOrigin,
    ) -> Result<(), EditError> {
        self.check(span)?;
        self.push(
            EditKind::Replace {
                span,
                text: text.into(),
            },
            origin,
        );
        Ok(())
    }

    /// Replace a terminator-exclusive statement range, consuming one directly
    /// following `;`.
    pub fn clear_statement(
        &mut self,
        span: Span,
        text: impl Into<String>,
        origin: EditOrigin,
    ) -> Result<(), EditError> {
        self.check(span)?;
        let span = self.with_terminator(span);
        self.replace(span, text, origin)
    }

    /// Extend a statement range over its trailing `;` if one follows directly.
    pub fn with_terminator(&self, span: Span) -> Span {
        if self.source.as_bytes().get(span.end) == Some(&b';') {
            Span::new(span.start, span.end + 1)
        } else {
            span
        }
    }

    /// Edits in application order: by position, inserts before a replace at
    /// the same offset, collection order otherwise.
    pub fn sorted(&self) -> Vec<&Edit> {
        let mut sorted: Vec<&Edit> = self.edits.iter().collect();
        sorted.sort_by_key(|e| (e.position(), !e.is_insert(), e.id));
        sorted
    }

    /// Pairs of replace spans that overlap. Always empty for engine output.
    pub fn overlapping_replaces(&self) -> Vec<(Span, Span)> {
        let replaces: Vec<Span> = self
            .edits
            .iter()
            .filter(|e| !e.is_insert())
            .map(Edit::span)
            .collect();
        let mut out = Vec::new();
        for i in 0..replaces.len() {
            for j in (i + 1)..replaces.len() {
                if replaces[i].overlaps(&replaces[j]) {
                    out.push((replaces[i], replaces[j]));
                }
            }
        }
        out
    }

    /// Apply all edits, producing new text plus byte provenance.
    pub fn apply(&self) -> Applied {
        let mut code = String::with_capacity(self.source.len());
        let mut chunks = Vec::new();
        let mut cursor = 0usize;

        for edit in self.sorted() {
            let span = edit.span();
            debug_assert!(
                span.start >= cursor,
                "edit {:?} at {} overlaps a preceding replace ending at {}",
                edit.kind,
                span.start,
                cursor
            );
            let start = span.start.max(cursor);
            if start > cursor {
                chunks.push(Chunk::Copied {
                    out: code.len(),
                    original: cursor,
                    len: start - cursor,
                });
                code.push_str(&self.source[cursor..start]);
            }
            let text = edit.text();
            if !text.is_empty() {
                chunks.push(Chunk::Generated {
                    out: code.len(),
                    original: start,
                    len: text.len(),
                });
                code.push_str(text);
            }
            cursor = span.end.max(start);
        }

        if cursor < self.source.len() {
            chunks.push(Chunk::Copied {
                out: code.len(),
                original: cursor,
                len: self.source.len() - cursor,
            });
            code.push_str(&self.source[cursor..]);
        }

        Applied { code, chunks }
    }

    /// Edits as display records, ordered by position.
    pub fn materialize(&self, file: &str) -> Vec<OutputEdit> {
        self.sorted()
            .into_iter()
            .map(|edit| {
                let span = edit.span();
                let (line, col) = byte_offset_to_position(self.source.as_bytes(), span.start);
                OutputEdit {
                    file: file.to_string(),
                    span,
                    old_text: self.source[span.start..span.end].to_string(),
                    new_text: edit.text().to_string(),
                    origin: edit.origin,
                    line,
                    col,
                }
            })
            .collect()
    }
}

/// A single edit as it appears in output (for JSON serialization and diffs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEdit {
    /// Workspace-relative file path.
    pub file: String,
    /// Byte range being replaced (empty for inserts).
    pub span: Span,
    /// Original text.
    pub old_text: String,
    /// Replacement text.
    pub new_text: String,
    /// Fact that produced the edit.
    pub origin: EditOrigin,
    /// 1-indexed line number (for display).
    pub line: u32,
    /// 1-indexed column (for display).
    pub col: u32,
}

// ============================================================================
// Tests
// ============================================================================
