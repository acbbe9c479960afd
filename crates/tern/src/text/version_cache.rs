//
// text/version_cache.rs
//
// Edit buffer for open documents with a bounded snapshot history
//

use std::collections::VecDeque;

use ropey::Rope;

use super::line_index::{LineIndexSnapshot, TextChangeRange, TextSpan};

/// Number of snapshots retained when no explicit limit is configured.
pub const DEFAULT_MAX_VERSIONS: usize = 8;

#[cfg(test)]
thread_local! {
    static FLATTENS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Times [`ScriptVersionCache::text`] ran on this thread.
#[cfg(test)]
pub(crate) fn flatten_count() -> usize {
    FLATTENS.with(|count| count.get())
}

#[derive(Debug, Clone)]
struct VersionEntry {
    snapshot: LineIndexSnapshot,
    /// Change relative to the previous version.
    change: TextChangeRange,
}

/// Rope-backed edit buffer that keeps the last few snapshots so callers can
/// ask what changed between two of them.
///
/// Each edit produces a new version. Versions older than the retention window
/// are evicted; asking for a change range that starts at an evicted version
/// returns `None` instead of a guess.
#[derive(Debug, Clone)]
pub struct ScriptVersionCache {
    rope: Rope,
    versions: VecDeque<VersionEntry>,
    current_version: u64,
    max_versions: usize,
}

impl ScriptVersionCache {
    pub fn from_text(text: &str, max_versions: usize) -> Self {
        let rope = Rope::from_str(text);
        let mut versions = VecDeque::with_capacity(max_versions.max(1));
        versions.push_back(VersionEntry {
            snapshot: LineIndexSnapshot::new(0, rope.clone()),
            change: TextChangeRange::unchanged(),
        });
        Self {
            rope,
            versions,
            current_version: 0,
            max_versions: max_versions.max(1),
        }
    }

    /// Replace `delete_len` chars at `start` with `insert`.
    ///
    /// Out-of-range positions are clamped to the document. Returns the new
    /// version number.
    pub fn edit(&mut self, start: usize, delete_len: usize, insert: &str) -> u64 {
        let len = self.rope.len_chars();
        let start = start.min(len);
        let end = start.saturating_add(delete_len).min(len);

        if end > start {
            self.rope.remove(start..end);
        }
        if !insert.is_empty() {
            self.rope.insert(start, insert);
        }

        self.current_version += 1;
        self.versions.push_back(VersionEntry {
            snapshot: LineIndexSnapshot::new(self.current_version, self.rope.clone()),
            change: TextChangeRange::new(
                TextSpan::from_bounds(start, end),
                insert.chars().count(),
            ),
        });
        while self.versions.len() > self.max_versions {
            self.versions.pop_front();
        }

        log::trace!(
            "Script version cache edit [{}, {}) +{} chars -> version {}",
            start,
            end,
            insert.len(),
            self.current_version
        );
        self.current_version
    }

    /// Replace the whole text, recording it as a single edit.
    pub fn replace_all(&mut self, text: &str) -> u64 {
        let len = self.rope.len_chars();
        self.edit(0, len, text)
    }

    pub fn snapshot(&self) -> LineIndexSnapshot {
        LineIndexSnapshot::new(self.current_version, self.rope.clone())
    }

    /// Snapshot of a retained version.
    pub fn snapshot_at(&self, version: u64) -> Option<LineIndexSnapshot> {
        self.versions
            .iter()
            .find(|entry| entry.snapshot.version() == version)
            .map(|entry| entry.snapshot.clone())
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    /// Oldest version still available for change-range queries.
    pub fn oldest_version(&self) -> u64 {
        self.versions
            .front()
            .map(|entry| entry.snapshot.version())
            .unwrap_or(self.current_version)
    }

    pub fn len(&self) -> usize {
        self.rope.len_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_chars() == 0
    }

    pub fn text(&self) -> String {
        #[cfg(test)]
        FLATTENS.with(|count| count.set(count.get() + 1));
        self.rope.to_string()
    }

    /// Compare the current text with `text` without flattening the rope.
    pub fn content_eq(&self, text: &str) -> bool {
        self.rope == text
    }

    /// Minimal change range turning version `old` into version `new`.
    ///
    /// Returns `None` when `old` has been evicted or the versions are out of
    /// order, meaning the caller must fall back to a full comparison.
    pub fn text_change_range(&self, old: u64, new: u64) -> Option<TextChangeRange> {
        if old > new || new > self.current_version || old < self.oldest_version() {
            return None;
        }
        if old == new {
            return Some(TextChangeRange::unchanged());
        }
        let changes: Vec<TextChangeRange> = self
            .versions
            .iter()
            .filter(|entry| {
                let version = entry.snapshot.version();
                version > old && version <= new
            })
            .map(|entry| entry.change)
            .collect();
        Some(TextChangeRange::collapse(&changes))
    }
}
