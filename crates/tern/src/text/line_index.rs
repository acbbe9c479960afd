//
// text/line_index.rs
//
// Immutable line-index snapshots and text change ranges
//

use ropey::Rope;
use serde::{Deserialize, Serialize};

/// A half-open range of char offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TextSpan {
    pub start: usize,
    pub length: usize,
}

impl TextSpan {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    pub fn from_bounds(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self {
            start,
            length: end - start,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Describes how a span of an older text was replaced by `new_length` chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TextChangeRange {
    pub span: TextSpan,
    pub new_length: usize,
}

impl TextChangeRange {
    pub fn new(span: TextSpan, new_length: usize) -> Self {
        Self { span, new_length }
    }

    /// The range used when two versions are identical.
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn is_unchanged(&self) -> bool {
        self.span.length == 0 && self.new_length == 0
    }

    /// Span of the replacement in the newer text.
    pub fn new_span(&self) -> TextSpan {
        TextSpan::new(self.span.start, self.new_length)
    }

    /// Merge consecutive change ranges (oldest first) into the smallest range
    /// that covers all of them, expressed against the oldest text.
    pub fn collapse(changes: &[TextChangeRange]) -> TextChangeRange {
        let Some(first) = changes.first() else {
            return Self::unchanged();
        };
        if changes.len() == 1 {
            return *first;
        }

        let mut old_start = first.span.start as isize;
        let mut old_end = first.span.end() as isize;
        let mut new_end = old_start + first.new_length as isize;

        for next in &changes[1..] {
            let old_start1 = old_start;
            let old_end1 = old_end;
            let new_end1 = new_end;

            let old_start2 = next.span.start as isize;
            let old_end2 = next.span.end() as isize;
            let new_end2 = old_start2 + next.new_length as isize;

            old_start = old_start1.min(old_start2);
            old_end = old_end1.max(old_end1 + (old_end2 - new_end1));
            new_end = new_end2.max(new_end2 + (new_end1 - old_end2));
        }

        TextChangeRange::new(
            TextSpan::from_bounds(old_start as usize, old_end as usize),
            (new_end - old_start) as usize,
        )
    }
}

/// 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineOffset {
    pub line: usize,
    pub offset: usize,
}

impl LineOffset {
    pub fn new(line: usize, offset: usize) -> Self {
        Self { line, offset }
    }
}

/// One immutable version of an open document.
///
/// Cloning is cheap: the rope shares its nodes with every other snapshot
/// taken from the same edit history.
#[derive(Debug, Clone)]
pub struct LineIndexSnapshot {
    version: u64,
    rope: Rope,
}

impl LineIndexSnapshot {
    pub fn new(version: u64, rope: Rope) -> Self {
        Self { version, rope }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.rope.len_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_chars() == 0
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Text between two char offsets, clamped to the document.
    pub fn text(&self, start: usize, end: usize) -> String {
        let len = self.len();
        let start = start.min(len);
        let end = end.clamp(start, len);
        self.rope.slice(start..end).to_string()
    }

    pub fn full_text(&self) -> String {
        self.rope.to_string()
    }

    pub fn position_to_line_offset(&self, position: usize) -> LineOffset {
        let position = position.min(self.len());
        let line = self.rope.char_to_line(position);
        let line_start = self.rope.line_to_char(line);
        LineOffset::new(line + 1, position - line_start + 1)
    }

    /// Inverse of [`position_to_line_offset`](Self::position_to_line_offset).
    ///
    /// Lines past the end map to the end of the document; offsets past the end
    /// of a line map to the line's last character.
    pub fn line_offset_to_position(&self, line: usize, offset: usize) -> usize {
        let line_idx = line.max(1) - 1;
        if line_idx >= self.rope.len_lines() {
            return self.len();
        }
        let line_start = self.rope.line_to_char(line_idx);
        let limit = max_column(&self.rope, line_idx);
        line_start + offset.max(1).saturating_sub(1).min(limit)
    }

    /// Span of a 1-based line including its line break.
    pub fn line_span(&self, line: usize) -> TextSpan {
        let line_idx = line.max(1) - 1;
        if line_idx >= self.rope.len_lines() {
            return TextSpan::new(self.len(), 0);
        }
        let start = self.rope.line_to_char(line_idx);
        TextSpan::new(start, self.rope.line(line_idx).len_chars())
    }
}

/// Largest zero-based column addressable on a line.
fn max_column(rope: &Rope, line_idx: usize) -> usize {
    let line = rope.line(line_idx);
    let total = line.len_chars();
    let has_break = line_idx + 1 < rope.len_lines();
    if has_break && total > 0 {
        total - 1
    } else {
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(text: &str) -> LineIndexSnapshot {
        LineIndexSnapshot::new(0, Rope::from_str(text))
    }

    #[test]
    fn test_position_to_line_offset_is_one_based() {
        let s = snapshot("ab\ncd\n");
        assert_eq!(s.position_to_line_offset(0), LineOffset::new(1, 1));
        assert_eq!(s.position_to_line_offset(2), LineOffset::new(1, 3));
        assert_eq!(s.position_to_line_offset(3), LineOffset::new(2, 1));
        assert_eq!(s.position_to_line_offset(6), LineOffset::new(3, 1));
    }

    #[test]
    fn test_line_offset_to_position_clamps() {
        let s = snapshot("ab\ncd");
        assert_eq!(s.line_offset_to_position(2, 2), 4);
        // Past the end of line 1 lands on its line break.
        assert_eq!(s.line_offset_to_position(1, 99), 2);
        // Past the last line lands at the end of the text.
        assert_eq!(s.line_offset_to_position(9, 1), 5);
    }

    #[test]
    fn test_crlf_round_trip() {
        let s = snapshot("a\r\nb");
        for p in 0..=s.len() {
            let lo = s.position_to_line_offset(p);
            assert_eq!(s.line_offset_to_position(lo.line, lo.offset), p);
        }
    }

    #[test]
    fn test_line_span_includes_break() {
        let s = snapshot("ab\ncd");
        assert_eq!(s.line_span(1), TextSpan::new(0, 3));
        assert_eq!(s.line_span(2), TextSpan::new(3, 2));
        assert_eq!(s.line_span(3), TextSpan::new(5, 0));
    }

    #[test]
    fn test_text_clamps_range() {
        let s = snapshot("hello");
        assert_eq!(s.text(1, 3), "el");
        assert_eq!(s.text(3, 100), "lo");
        assert_eq!(s.text(10, 20), "");
    }

    #[test]
    fn test_collapse_empty_and_single() {
        assert!(TextChangeRange::collapse(&[]).is_unchanged());
        let one = TextChangeRange::new(TextSpan::new(2, 3), 1);
        assert_eq!(TextChangeRange::collapse(&[one]), one);
    }

    #[test]
    fn test_collapse_two_disjoint_edits() {
        // "abcdef" -> replace [1,2) with "XY" -> "aXYcdef" -> delete [5,6) -> "aXYcdf"
        let first = TextChangeRange::new(TextSpan::new(1, 1), 2);
        let second = TextChangeRange::new(TextSpan::new(5, 1), 0);
        let merged = TextChangeRange::collapse(&[first, second]);
        // Old range [1, 5) of "abcdef" ("bcde") became "XYcd".
        assert_eq!(merged.span, TextSpan::new(1, 4));
        assert_eq!(merged.new_length, 4);
    }
}
