//! Text position utilities for byte offset and line:column conversions.
//!
//! ## Coordinate Conventions
//!
//! - [`byte_offset_to_position`] returns **1-indexed** lines and columns
//!   (editor conventions, used in diagnostics and diffs)
//! - [`LineIndex`] works in **0-indexed** lines and columns (source map
//!   conventions)
//! - Byte offsets are always **0-indexed**; columns count bytes

/// Convert a byte offset to 1-indexed line and column.
///
/// If `offset` exceeds content length, returns position at end of content.
pub fn byte_offset_to_position(content: &[u8], offset: usize) -> (u32, u32) {
    let offset = offset.min(content.len());
    let mut line = 1u32;
    let mut col = 1u32;

    for &byte in &content[..offset] {
        if byte == b'\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Count the number of lines in the content.
pub fn line_count(content: &[u8]) -> u32 {
    let newlines = content.iter().filter(|&&b| b == b'\n').count() as u32;
    if content.is_empty() {
        0
    } else if content.last() == Some(&b'\n') {
        newlines
    } else {
        newlines + 1
    }
}

/// Precomputed line starts for repeated offset lookups.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    /// Index the line starts of `content`.
    pub fn new(content: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            content
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        LineIndex {
            starts,
            len: content.len(),
        }
    }

    /// 0-indexed `(line, column)` of a byte offset, clamped to the content.
    pub fn position(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.len);
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        (line as u32, (offset - self.starts[line]) as u32)
    }

    /// Byte offset where a 0-indexed line starts, if the line exists.
    pub fn line_start(&self, line: u32) -> Option<usize> {
        self.starts.get(line as usize).copied()
    }

    /// Number of line starts (a trailing newline opens an empty last line).
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// Never true: every text has at least one line start.
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_to_position_simple() {
        let content = b"line1\nline2\nline3\n";
        assert_eq!(byte_offset_to_position(content, 0), (1, 1));
        assert_eq!(byte_offset_to_position(content, 4), (1, 5));
        assert_eq!(byte_offset_to_position(content, 5), (1, 6)); // newline char
        assert_eq!(byte_offset_to_position(content, 6), (2, 1));
        assert_eq!(byte_offset_to_position(content, 12), (3, 1));
        assert_eq!(byte_offset_to_position(content, 999), (4, 1));
    }

    #[test]
    fn line_count_handles_trailing_newline() {
        assert_eq!(line_count(b""), 0);
        assert_eq!(line_count(b"a"), 1);
        assert_eq!(line_count(b"a\nb\n"), 2);
        assert_eq!(line_count(b"a\nb"), 2);
    }

    #[test]
    fn line_index_positions_are_zero_based() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.position(0), (0, 0));
        assert_eq!(index.position(1), (0, 1));
        assert_eq!(index.position(3), (1, 0));
        assert_eq!(index.position(6), (2, 0));
        assert_eq!(index.position(8), (3, 1));
        assert_eq!(index.line_start(1), Some(3));
        assert_eq!(index.line_start(9), None);
        assert_eq!(index.len(), 4);
    }
}
