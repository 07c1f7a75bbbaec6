//! Unified diff generation for `transform --dry-run`.
//!
//! Lines are compared whole (terminator included). Common prefix and suffix
//! are stripped first; the remaining middle is aligned with an LCS table, or
//! shown as one replaced block when it is too large for the table.

use std::fmt::Write as _;

/// Lines of context around each change.
pub const CONTEXT: usize = 3;

/// Largest LCS table (cells) built before falling back to a block replace.
const MAX_TABLE: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

impl Op {
    fn is_change(self) -> bool {
        !matches!(self, Op::Equal(..))
    }
}

fn diff_lines(old: &[&str], new: &[&str]) -> Vec<Op> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let mut ops: Vec<Op> = (0..prefix).map(|i| Op::Equal(i, i)).collect();
    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    if a.len().saturating_mul(b.len()) <= MAX_TABLE {
        align(a, b, prefix, &mut ops);
    } else {
        ops.extend((0..a.len()).map(|i| Op::Delete(prefix + i)));
        ops.extend((0..b.len()).map(|j| Op::Insert(prefix + j)));
    }

    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    ops.extend((0..suffix).map(|k| Op::Equal(old_tail + k, new_tail + k)));
    ops
}

fn align(a: &[&str], b: &[&str], offset: usize, ops: &mut Vec<Op>) {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of a[i..] and b[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(Op::Equal(offset + i, offset + j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(Op::Delete(offset + i));
            i += 1;
        } else {
            ops.push(Op::Insert(offset + j));
            j += 1;
        }
    }
    ops.extend((i..n).map(|i| Op::Delete(offset + i)));
    ops.extend((j..m).map(|j| Op::Insert(offset + j)));
}

/// Group change positions into hunk ranges over `ops`.
fn hunks(ops: &[Op]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (idx, op) in ops.iter().enumerate() {
        if !op.is_change() {
            continue;
        }
        let start = idx.saturating_sub(CONTEXT);
        let end = (idx + 1 + CONTEXT).min(ops.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

fn push_line(out: &mut String, marker: char, line: &str) {
    out.push(marker);
    match line.strip_suffix('\n') {
        Some(body) => {
            out.push_str(body);
            out.push('\n');
        }
        None => {
            out.push_str(line);
            out.push_str("\n\\ No newline at end of file\n");
        }
    }
}

/// Unified diff between two versions of `file`. Empty when identical.
pub fn unified_diff(file: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let new_lines: Vec<&str> = new.split_inclusive('\n').collect();
    let ops = diff_lines(&old_lines, &new_lines);

    // Positions in old/new before each op.
    let mut positions = Vec::with_capacity(ops.len() + 1);
    let (mut o, mut n) = (0usize, 0usize);
    for op in &ops {
        positions.push((o, n));
        match op {
            Op::Equal(..) => {
                o += 1;
                n += 1;
            }
            Op::Delete(_) => o += 1,
            Op::Insert(_) => n += 1,
        }
    }
    positions.push((o, n));

    let mut out = String::new();
    let _ = writeln!(out, "--- a/{}", file);
    let _ = writeln!(out, "+++ b/{}", file);

    for (start, end) in hunks(&ops) {
        let (old_pos, new_pos) = positions[start];
        let (old_end, new_end) = positions[end];
        let old_count = old_end - old_pos;
        let new_count = new_end - new_pos;
        let old_start = if old_count == 0 { old_pos } else { old_pos + 1 };
        let new_start = if new_count == 0 { new_pos } else { new_pos + 1 };
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            old_start, old_count, new_start, new_count
        );
        for op in &ops[start..end] {
            match *op {
                Op::Equal(i, _) => push_line(&mut out, ' ', old_lines[i]),
                Op::Delete(i) => push_line(&mut out, '-', old_lines[i]),
                Op::Insert(j) => push_line(&mut out, '+', new_lines[j]),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identical_text_has_no_diff() {
        assert_eq!(unified_diff("a.js", "x\n", "x\n"), "");
    }

    #[test]
    fn single_line_change() {
        let diff = unified_diff("a.js", "a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(
            diff,
            "--- a/a.js\n+++ b/a.js\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n"
        );
    }

    #[test]
    fn insertion_at_top() {
        let diff = unified_diff("a.js", "x;\n", "import y;\nx;\n");
        assert_eq!(diff, "--- a/a.js\n+++ b/a.js\n@@ -1,1 +1,2 @@\n+import y;\n x;\n");
    }

    #[test]
    fn distant_changes_make_separate_hunks() {
        let old: String = (0..20).map(|i| format!("l{}\n", i)).collect();
        let new = old.replace("l1\n", "L1\n").replace("l18\n", "L18\n");
        let diff = unified_diff("a.js", &old, &new);
        assert_eq!(diff.matches("@@ -").count(), 2);
        assert!(diff.contains("-l18\n+L18\n"));
    }

    #[test]
    fn missing_trailing_newline_is_marked() {
        let diff = unified_diff("a.js", "a", "a\nexport default a;\n");
        assert!(diff.contains("-a\n\\ No newline at end of file\n"));
        assert!(diff.contains("+a\n+export default a;\n"));
    }
}
