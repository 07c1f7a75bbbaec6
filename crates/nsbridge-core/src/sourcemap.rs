//! Source map (revision 3) generation for rewritten modules.
//!
//! Maps are derived from the chunk provenance of an applied [`EditSet`]:
//! copied text maps byte-for-byte back to the original, generated text maps
//! to the position of the edit that produced it. A segment is emitted at the
//! start of every chunk and at every output line start inside a chunk.
//!
//! [`EditSet`]: crate::edit::EditSet

use serde::{Deserialize, Serialize};

use crate::edit::{Applied, Chunk};
use crate::text::LineIndex;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A source map in the revision 3 JSON layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<String>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    /// Build a single-source map for an applied edit set.
    pub fn from_applied(
        applied: &Applied,
        original: &str,
        source_name: &str,
        file: Option<&str>,
        include_content: bool,
    ) -> Self {
        let segments = collect_segments(applied, original);
        SourceMap {
            version: 3,
            file: file.map(str::to_string),
            sources: vec![source_name.to_string()],
            sources_content: include_content.then(|| vec![original.to_string()]),
            names: Vec::new(),
            mappings: encode_mappings(&segments),
        }
    }

    /// Serialize as compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One mapping: generated `(line, col)` to original `(line, col)`, 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Segment {
    pub gen_line: u32,
    pub gen_col: u32,
    pub src_line: u32,
    pub src_col: u32,
}

/// Derive mapping segments from chunk provenance.
pub fn collect_segments(applied: &Applied, original: &str) -> Vec<Segment> {
    let out_index = LineIndex::new(&applied.code);
    let src_index = LineIndex::new(original);
    let mut segments = Vec::new();

    for chunk in &applied.chunks {
        let (out, original_pos, len, copied) = match *chunk {
            Chunk::Copied { out, original, len } => (out, original, len, true),
            Chunk::Generated { out, original, len } => (out, original, len, false),
        };
        let mut push = |out_offset: usize, src_offset: usize| {
            let (gen_line, gen_col) = out_index.position(out_offset);
            let (src_line, src_col) = src_index.position(src_offset);
            segments.push(Segment {
                gen_line,
                gen_col,
                src_line,
                src_col,
            });
        };
        push(out, original_pos);

        let (first_line, _) = out_index.position(out);
        let mut line = first_line + 1;
        while let Some(start) = out_index.line_start(line) {
            if start >= out + len {
                break;
            }
            let src = if copied {
                original_pos + (start - out)
            } else {
                original_pos
            };
            push(start, src);
            line += 1;
        }
    }

    segments.sort();
    segments.dedup_by_key(|s| (s.gen_line, s.gen_col));
    segments
}

/// Encode segments into the `mappings` string.
pub fn encode_mappings(segments: &[Segment]) -> String {
    let mut out = String::new();
    let mut line = 0u32;
    let mut prev_gen_col = 0i64;
    let mut prev_src_line = 0i64;
    let mut prev_src_col = 0i64;
    let mut first_in_line = true;

    for seg in segments {
        while line < seg.gen_line {
            out.push(';');
            line += 1;
            prev_gen_col = 0;
            first_in_line = true;
        }
        if !first_in_line {
            out.push(',');
        }
        first_in_line = false;

        encode_vlq(&mut out, seg.gen_col as i64 - prev_gen_col);
        // single source, index delta is always zero
        encode_vlq(&mut out, 0);
        encode_vlq(&mut out, seg.src_line as i64 - prev_src_line);
        encode_vlq(&mut out, seg.src_col as i64 - prev_src_col);

        prev_gen_col = seg.gen_col as i64;
        prev_src_line = seg.src_line as i64;
        prev_src_col = seg.src_col as i64;
    }
    out
}

/// Append the base64 VLQ encoding of `value`.
pub fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq: u64 = if value < 0 {
        ((value.unsigned_abs()) << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}
