//
// text/storage.rs
//
// Per-file text storage: rope while open, flat text while closed
//

use std::cell::OnceCell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use ropey::Rope;

use super::line_index::{LineIndexSnapshot, LineOffset, TextSpan};
use super::version_cache::ScriptVersionCache;

/// Line starts and char length of flat text.
#[derive(Debug)]
struct FlatLines {
    starts: Vec<usize>,
    len: usize,
}

/// Version pair of a text storage: generation of the flat text and, while a
/// rope is in use, the rope generation plus its edit version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextVersion {
    pub svc: Option<(u64, u64)>,
    pub text: u64,
}

impl fmt::Display for TextVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.svc {
            Some((generation, edits)) => write!(f, "SVC-{}-{}", generation, edits),
            None => write!(f, "Text-{}", self.text),
        }
    }
}

/// Text of one file.
///
/// Open files are edited through a [`ScriptVersionCache`]. Closed files keep a
/// flat string with a line-start table computed on first use. A content hash
/// lets reloads tell a real change from a re-read of identical bytes, even
/// after the flat text was released to save memory.
///
/// Edits never flatten the rope: they invalidate the hash, and the next
/// reload compares against the rope directly.
pub struct TextStorage {
    svc: Option<ScriptVersionCache>,
    text: Option<String>,
    line_starts: OnceCell<FlatLines>,
    text_generation: u64,
    svc_generation: u64,
    content_version: u64,
    content_hash: Option<u64>,
    is_open: bool,
    pending_reload_from_disk: bool,
    max_versions: usize,
}

impl TextStorage {
    pub fn new(max_versions: usize) -> Self {
        Self {
            svc: None,
            text: None,
            line_starts: OnceCell::new(),
            text_generation: 0,
            svc_generation: 0,
            content_version: 0,
            content_hash: None,
            is_open: false,
            pending_reload_from_disk: false,
            max_versions,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn set_open(&mut self, open: bool) {
        self.is_open = open;
    }

    pub fn has_script_version_cache(&self) -> bool {
        self.svc.is_some()
    }

    /// True when the current text is known (not released, not pending reload).
    pub fn is_loaded(&self) -> bool {
        !self.pending_reload_from_disk && (self.svc.is_some() || self.text.is_some())
    }

    pub fn pending_reload_from_disk(&self) -> bool {
        self.pending_reload_from_disk
    }

    pub fn version(&self) -> TextVersion {
        TextVersion {
            svc: self
                .svc
                .as_ref()
                .map(|svc| (self.svc_generation, svc.current_version())),
            text: self.text_generation,
        }
    }

    /// Counter that moves only when the content really changes.
    pub fn content_version(&self) -> u64 {
        self.content_version
    }

    /// Replace the content with `text` and drop any rope.
    ///
    /// Returns true when the content differs from what was stored before.
    pub fn use_text(&mut self, text: String) -> bool {
        let changed = self.record_content(&text);
        self.svc = None;
        self.text = Some(text);
        self.line_starts = OnceCell::new();
        self.text_generation += 1;
        self.pending_reload_from_disk = false;
        changed
    }

    /// Reload with `text`, keeping the edit history when a rope is in use.
    pub fn reload(&mut self, text: String) -> bool {
        if self.svc.is_some() {
            self.pending_reload_from_disk = false;
            if !self.record_content(&text) {
                return false;
            }
            if let Some(svc) = self.svc.as_mut() {
                svc.replace_all(&text);
            }
            return true;
        }
        self.use_text(text)
    }

    /// Apply an edit in char offsets, switching to the rope if necessary.
    pub fn edit(&mut self, start: usize, end: usize, new_text: &str) {
        let end = end.max(start);
        let svc = self.switch_to_script_version_cache();
        svc.edit(start, end - start, new_text);
        self.content_hash = None;
        self.content_version += 1;
        self.text = None;
        self.line_starts = OnceCell::new();
    }

    /// Ensure a rope exists, building it from the flat text when needed.
    pub fn switch_to_script_version_cache(&mut self) -> &mut ScriptVersionCache {
        let max_versions = self.max_versions;
        if self.svc.is_none() {
            self.svc_generation += 1;
            self.line_starts = OnceCell::new();
        }
        let text = &mut self.text;
        self.svc.get_or_insert_with(|| {
            let text = text.take().unwrap_or_default();
            ScriptVersionCache::from_text(&text, max_versions)
        })
    }

    /// Fold the rope back into flat text, e.g. when the file closes.
    pub fn switch_to_text(&mut self) {
        if let Some(svc) = self.svc.take() {
            self.text = Some(svc.text());
            self.line_starts = OnceCell::new();
            self.text_generation += 1;
        }
    }

    /// Mark the on-disk content as newer than what is held.
    ///
    /// Returns true if this call changed the state.
    pub fn schedule_reload_if_needed(&mut self) -> bool {
        if self.pending_reload_from_disk {
            return false;
        }
        self.pending_reload_from_disk = true;
        true
    }

    /// Defer the next read to disk without invalidating the content hash.
    pub fn delay_reload_from_file_into_text(&mut self) {
        self.pending_reload_from_disk = true;
    }

    /// Drop the flat text of a closed file; it is re-read on demand.
    pub fn release_text(&mut self) -> bool {
        if self.is_open || self.svc.is_some() {
            return false;
        }
        let Some(text) = self.text.take() else {
            return false;
        };
        // Keep what later reloads compare against.
        if self.content_hash.is_none() {
            self.content_hash = Some(hash_text(&text));
        }
        self.line_starts = OnceCell::new();
        true
    }

    /// Current content, if loaded.
    pub fn text(&self) -> Option<String> {
        match (&self.svc, &self.text) {
            (Some(svc), _) => Some(svc.text()),
            (None, Some(text)) => Some(text.clone()),
            (None, None) => None,
        }
    }

    pub fn len(&self) -> usize {
        match (&self.svc, &self.text) {
            (Some(svc), _) => svc.len(),
            (None, Some(_)) => self.flat_lines().len,
            (None, None) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn script_version_cache(&self) -> Option<&ScriptVersionCache> {
        self.svc.as_ref()
    }

    pub fn snapshot(&self) -> Option<LineIndexSnapshot> {
        self.svc.as_ref().map(ScriptVersionCache::snapshot)
    }

    /// Line index over the current content. Flat text is copied into a rope.
    pub fn line_info(&self) -> LineIndexSnapshot {
        match &self.svc {
            Some(svc) => svc.snapshot(),
            None => LineIndexSnapshot::new(
                self.text_generation,
                Rope::from_str(self.text.as_deref().unwrap_or_default()),
            ),
        }
    }

    pub fn line_count(&self) -> usize {
        match &self.svc {
            Some(svc) => svc.snapshot().line_count(),
            None => self.line_starts().len(),
        }
    }

    pub fn position_to_line_offset(&self, position: usize) -> LineOffset {
        if let Some(svc) = &self.svc {
            return svc.snapshot().position_to_line_offset(position);
        }
        let position = position.min(self.len());
        let starts = self.line_starts();
        let line = match starts.binary_search(&position) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        LineOffset::new(line + 1, position - starts[line] + 1)
    }

    pub fn line_offset_to_position(&self, line: usize, offset: usize) -> usize {
        if let Some(svc) = &self.svc {
            return svc.snapshot().line_offset_to_position(line, offset);
        }
        let starts = self.line_starts();
        let line_idx = line.max(1) - 1;
        let len = self.len();
        if line_idx >= starts.len() {
            return len;
        }
        let start = starts[line_idx];
        let limit = match starts.get(line_idx + 1) {
            Some(next) => next - start - 1,
            None => len - start,
        };
        start + offset.max(1).saturating_sub(1).min(limit)
    }

    /// Span of a 1-based line including its line break.
    pub fn line_span(&self, line: usize) -> TextSpan {
        if let Some(svc) = &self.svc {
            return svc.snapshot().line_span(line);
        }
        let starts = self.line_starts();
        let line_idx = line.max(1) - 1;
        let len = self.len();
        match starts.get(line_idx) {
            Some(&start) => {
                let end = starts.get(line_idx + 1).copied().unwrap_or(len);
                TextSpan::from_bounds(start, end)
            }
            None => TextSpan::new(len, 0),
        }
    }

    fn flat_lines(&self) -> &FlatLines {
        self.line_starts.get_or_init(|| {
            let text = self.text.as_deref().unwrap_or_default();
            FlatLines {
                starts: compute_line_starts(text),
                len: text.chars().count(),
            }
        })
    }

    fn line_starts(&self) -> &[usize] {
        &self.flat_lines().starts
    }

    /// Record `text` as the new content. Returns true when it differs from
    /// the current content.
    fn record_content(&mut self, text: &str) -> bool {
        let hash = hash_text(text);
        let changed = match (self.content_hash, &self.svc, &self.text) {
            (Some(current), _, _) => current != hash,
            (None, Some(svc), _) => !svc.content_eq(text),
            (None, None, Some(current)) => current != text,
            (None, None, None) => true,
        };
        self.content_hash = Some(hash);
        if changed {
            self.content_version += 1;
        }
        changed
    }
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Char offsets at which each line begins.
///
/// Recognizes the same line breaks as the rope: LF, CR, CRLF, VT, FF, NEL and
/// the Unicode line and paragraph separators.
pub fn compute_line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    let mut chars = text.chars().peekable();
    let mut position = 0;
    while let Some(ch) = chars.next() {
        position += 1;
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    position += 1;
                }
                starts.push(position);
            }
            '\n' | '\u{000B}' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}' => {
                starts.push(position);
            }
            _ => {}
        }
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::version_cache::flatten_count;

    #[test]
    fn test_compute_line_starts() {
        assert_eq!(compute_line_starts(""), vec![0]);
        assert_eq!(compute_line_starts("a\nb"), vec![0, 2]);
        assert_eq!(compute_line_starts("a\r\nb\rc\n"), vec![0, 3, 5, 7]);
    }

    #[test]
    fn test_use_text_reports_change_only_on_new_content() {
        let mut storage = TextStorage::new(8);
        assert!(storage.use_text("a".to_string()));
        assert!(!storage.use_text("a".to_string()));
        assert!(storage.use_text("b".to_string()));
        assert_eq!(storage.content_version(), 2);
    }

    #[test]
    fn test_edit_switches_to_rope() {
        let mut storage = TextStorage::new(8);
        storage.use_text("hello".to_string());
        assert!(!storage.has_script_version_cache());
        storage.edit(5, 5, " world");
        assert!(storage.has_script_version_cache());
        assert_eq!(storage.text().as_deref(), Some("hello world"));
        assert_eq!(storage.version().to_string(), "SVC-1-1");
    }

    #[test]
    fn test_switch_to_text_keeps_content_version() {
        let mut storage = TextStorage::new(8);
        storage.use_text("x".to_string());
        storage.edit(1, 1, "y");
        let before = storage.content_version();
        storage.switch_to_text();
        assert_eq!(storage.content_version(), before);
        assert_eq!(storage.text().as_deref(), Some("xy"));
        assert!(storage.version().to_string().starts_with("Text-"));
    }

    #[test]
    fn test_reload_with_rope_keeps_history() {
        let mut storage = TextStorage::new(8);
        storage.use_text("abc".to_string());
        storage.switch_to_script_version_cache();
        assert!(!storage.reload("abc".to_string()));
        assert!(storage.reload("abd".to_string()));
        let svc = storage.script_version_cache().unwrap();
        assert_eq!(svc.current_version(), 1);
        assert!(svc.text_change_range(0, 1).is_some());
    }

    #[test]
    fn test_release_text_then_identical_reload_is_not_a_change() {
        let mut storage = TextStorage::new(8);
        storage.use_text("same".to_string());
        assert!(storage.release_text());
        assert!(!storage.is_loaded());
        assert!(!storage.use_text("same".to_string()));
    }

    #[test]
    fn test_flat_text_line_conversions_match_rope() {
        let text = "ab\r\ncd\n\nlast";
        let mut flat = TextStorage::new(8);
        flat.use_text(text.to_string());
        let mut rope = TextStorage::new(8);
        rope.use_text(text.to_string());
        rope.switch_to_script_version_cache();
        for p in 0..=text.chars().count() {
            let a = flat.position_to_line_offset(p);
            let b = rope.position_to_line_offset(p);
            assert_eq!(a, b, "position {}", p);
            assert_eq!(flat.line_offset_to_position(a.line, a.offset), p);
        }
        assert_eq!(flat.line_count(), rope.line_count());
        assert_eq!(flat.line_span(2), rope.line_span(2));
    }

    #[test]
    fn test_edits_never_flatten_the_rope() {
        let line = "export const value = compute(alpha, beta);\n";
        let mut storage = TextStorage::new(8);
        storage.use_text(line.repeat(20_000));
        storage.set_open(true);
        storage.switch_to_script_version_cache();

        let before = flatten_count();
        for i in 0..1_000 {
            storage.edit(i * 7, i * 7 + 1, "x");
        }
        assert_eq!(flatten_count(), before);
        assert_eq!(storage.content_version(), 1_001);
        assert_eq!(storage.len(), line.chars().count() * 20_000);
    }

    #[test]
    fn test_reload_after_edits_compares_against_rope() {
        let mut storage = TextStorage::new(8);
        storage.use_text("abc".to_string());
        storage.switch_to_script_version_cache();
        storage.edit(3, 3, "d");
        let version = storage.content_version();

        assert!(!storage.reload("abcd".to_string()));
        assert_eq!(storage.content_version(), version);
        assert!(storage.reload("abc".to_string()));
        assert_eq!(storage.content_version(), version + 1);
    }

    #[test]
    fn test_release_after_edits_keeps_change_detection() {
        let mut storage = TextStorage::new(8);
        storage.use_text("one".to_string());
        storage.edit(3, 3, "two");
        storage.switch_to_text();
        assert!(storage.release_text());
        assert!(!storage.use_text("onetwo".to_string()));
        assert!(storage.release_text());
        assert!(storage.use_text("three".to_string()));
    }

    #[test]
    fn test_flat_length_counts_chars() {
        let mut storage = TextStorage::new(8);
        storage.use_text("héllo\nwörld".to_string());
        assert_eq!(storage.len(), 11);
        assert_eq!(storage.position_to_line_offset(100), LineOffset::new(2, 6));
    }

    #[test]
    fn test_schedule_reload_if_needed_is_edge_triggered() {
        let mut storage = TextStorage::new(8);
        storage.use_text("a".to_string());
        assert!(storage.schedule_reload_if_needed());
        assert!(!storage.schedule_reload_if_needed());
        assert!(storage.pending_reload_from_disk());
    }
}
