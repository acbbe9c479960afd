//
// test_utils/memory_host.rs
//
// In-memory host with synthesized watch events and a virtual clock
//

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::HostError;
use crate::host::{DirectoryEntries, HostEvent, ServerHost, TimerId, WatchEvent, WatchEventKind, WatchId};
use crate::path::NormalizedPath;

#[derive(Debug, Clone)]
struct FileEntry {
    content: String,
    mtime: SystemTime,
}

#[derive(Debug, Clone)]
enum WatchTarget {
    File(String),
    Directory { path: String, recursive: bool },
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, FileEntry>,
    directories: BTreeSet<String>,
    watchers: BTreeMap<WatchId, WatchTarget>,
    events: Vec<HostEvent>,
    timers: BTreeMap<TimerId, Duration>,
    now: Duration,
    next_id: u64,
    writes: u64,
    current_directory: String,
}

/// A [`ServerHost`] over an in-memory file tree.
///
/// Writes and deletes queue the watch events a real file system would
/// produce for the registered watchers; tests drain them with
/// [`take_events`](Self::take_events). Timers fire only when the virtual
/// clock is moved with [`advance`](Self::advance).
///
/// Non-recursive directory watchers see changes to their direct children.
/// A file created or deleted deeper down is reported as the creation or
/// deletion of the direct child directory, when that directory appeared or
/// disappeared with it.
#[derive(Debug)]
pub struct MemoryHost {
    state: Mutex<State>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

fn prefix_of(dir: &str) -> String {
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{}/", dir)
    }
}

fn parent_of(path: &str) -> Option<String> {
    NormalizedPath::from_absolute(path)
        .parent()
        .map(|p| p.as_str().to_string())
}

/// The child of `dir` on the way down to `path`.
fn direct_child(dir: &str, path: &str) -> Option<String> {
    let prefix = prefix_of(dir);
    let rest = path.strip_prefix(&prefix)?;
    let segment = rest.split('/').next()?;
    Some(format!("{}{}", prefix, segment))
}

impl State {
    fn dir_exists(&self, path: &str) -> bool {
        if path == "/" || self.directories.contains(path) {
            return true;
        }
        let prefix = prefix_of(path);
        let under = |key: &String| key.starts_with(&prefix);
        self.files.range(prefix.clone()..).next().is_some_and(|(k, _)| under(k))
            || self.directories.range(prefix.clone()..).next().is_some_and(under)
    }

    fn ancestors(path: &str) -> Vec<String> {
        let mut dirs = Vec::new();
        let mut next = parent_of(path);
        while let Some(dir) = next {
            next = parent_of(&dir);
            dirs.push(dir);
        }
        dirs
    }

    fn missing_ancestors(&self, path: &str) -> Vec<String> {
        Self::ancestors(path)
            .into_iter()
            .filter(|dir| !self.dir_exists(dir))
            .collect()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn mtime(&mut self) -> SystemTime {
        self.writes += 1;
        UNIX_EPOCH + Duration::from_secs(1_000_000) + self.now + Duration::from_nanos(self.writes)
    }

    /// Queue events for a change at `path`; `changed_dirs` are directories
    /// that appeared or disappeared with it.
    fn notify(&mut self, path: &str, kind: WatchEventKind, changed_dirs: &[String]) {
        let mut events = Vec::new();
        for (id, target) in &self.watchers {
            let reported = match target {
                WatchTarget::File(watched) => (watched == path).then(|| path.to_string()),
                WatchTarget::Directory { path: dir, recursive } => {
                    let Some(child) = direct_child(dir, path) else {
                        continue;
                    };
                    if *recursive || child == path {
                        Some(path.to_string())
                    } else if changed_dirs.contains(&child) {
                        Some(child)
                    } else {
                        None
                    }
                }
            };
            if let Some(reported) = reported {
                events.push(HostEvent::Watch(WatchEvent {
                    id: *id,
                    path: NormalizedPath::from_absolute(&reported),
                    kind,
                }));
            }
        }
        self.events.extend(events);
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current_directory: "/".to_string(),
                ..State::default()
            }),
        }
    }

    pub fn with_current_directory(dir: &str) -> Self {
        let host = Self::new();
        host.state().current_directory = NormalizedPath::from_absolute(dir).as_str().to_string();
        host
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or overwrite a file, queueing watch events.
    pub fn add_file(&self, path: &str, content: &str) {
        let path = NormalizedPath::from_absolute(path).as_str().to_string();
        let mut state = self.state();
        let existed = state.files.contains_key(&path);
        let created_dirs = state.missing_ancestors(&path);
        let mtime = state.mtime();
        state.files.insert(
            path.clone(),
            FileEntry {
                content: content.to_string(),
                mtime,
            },
        );
        let kind = if existed {
            WatchEventKind::Changed
        } else {
            WatchEventKind::Created
        };
        state.notify(&path, kind, &created_dirs);
    }

    /// Remove a file, queueing watch events. Returns false if it was absent.
    pub fn delete_file(&self, path: &str) -> bool {
        let path = NormalizedPath::from_absolute(path).as_str().to_string();
        let mut state = self.state();
        if state.files.remove(&path).is_none() {
            return false;
        }
        let vanished = state.missing_ancestors(&path);
        state.notify(&path, WatchEventKind::Deleted, &vanished);
        true
    }

    pub fn add_directory(&self, path: &str) {
        let path = NormalizedPath::from_absolute(path).as_str().to_string();
        let mut state = self.state();
        if state.dir_exists(&path) {
            return;
        }
        let created_dirs = state.missing_ancestors(&path);
        state.directories.insert(path.clone());
        state.notify(&path, WatchEventKind::Created, &created_dirs);
    }

    pub fn read(&self, path: &str) -> Option<String> {
        let path = NormalizedPath::from_absolute(path);
        self.state().files.get(path.as_str()).map(|f| f.content.clone())
    }

    pub fn watcher_count(&self) -> usize {
        self.state().watchers.len()
    }

    /// Watched paths with a recursion flag; files report `None`.
    pub fn watched_paths(&self) -> Vec<(String, Option<bool>)> {
        self.state()
            .watchers
            .values()
            .map(|target| match target {
                WatchTarget::File(path) => (path.clone(), None),
                WatchTarget::Directory { path, recursive } => (path.clone(), Some(*recursive)),
            })
            .collect()
    }

    /// Drain queued watch events.
    pub fn take_events(&self) -> Vec<HostEvent> {
        std::mem::take(&mut self.state().events)
    }

    /// Move the virtual clock and return the timers that fired, in
    /// deadline order.
    pub fn advance(&self, elapsed: Duration) -> Vec<TimerId> {
        let mut state = self.state();
        state.now += elapsed;
        let now = state.now;
        let mut due: Vec<(Duration, TimerId)> = state
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        due.sort();
        for (_, id) in &due {
            state.timers.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn pending_timer_count(&self) -> usize {
        self.state().timers.len()
    }

    pub fn now(&self) -> Duration {
        self.state().now
    }
}

impl ServerHost for MemoryHost {
    fn use_case_sensitive_file_names(&self) -> bool {
        true
    }

    fn current_directory(&self) -> NormalizedPath {
        NormalizedPath::from_absolute(&self.state().current_directory)
    }

    fn read_file(&self, path: &NormalizedPath) -> Result<String, HostError> {
        self.state()
            .files
            .get(path.as_str())
            .map(|f| f.content.clone())
            .ok_or_else(|| HostError::NotFound(path.to_string()))
    }

    fn write_file(&self, path: &NormalizedPath, content: &str) -> Result<(), HostError> {
        self.add_file(path.as_str(), content);
        Ok(())
    }

    fn file_exists(&self, path: &NormalizedPath) -> bool {
        self.state().files.contains_key(path.as_str())
    }

    fn directory_exists(&self, path: &NormalizedPath) -> bool {
        self.state().dir_exists(path.as_str())
    }

    fn directory_entries(&self, path: &NormalizedPath) -> DirectoryEntries {
        let state = self.state();
        let prefix = prefix_of(path.as_str());
        let mut files = BTreeSet::new();
        let mut directories = BTreeSet::new();
        let keys = state
            .files
            .range(prefix.clone()..)
            .map(|(k, _)| (k, true))
            .take_while(|(k, _)| k.starts_with(&prefix))
            .chain(
                state
                    .directories
                    .range(prefix.clone()..)
                    .map(|k| (k, false))
                    .take_while(|(k, _)| k.starts_with(&prefix)),
            );
        for (key, is_file) in keys {
            let rest = &key[prefix.len()..];
            match rest.split_once('/') {
                Some((dir, _)) => {
                    directories.insert(dir.to_string());
                }
                None if is_file => {
                    files.insert(rest.to_string());
                }
                None => {
                    directories.insert(rest.to_string());
                }
            }
        }
        DirectoryEntries {
            files: files.into_iter().collect(),
            directories: directories.into_iter().collect(),
        }
    }

    fn modified_time(&self, path: &NormalizedPath) -> Option<SystemTime> {
        self.state().files.get(path.as_str()).map(|f| f.mtime)
    }

    fn file_size(&self, path: &NormalizedPath) -> Option<u64> {
        self.state()
            .files
            .get(path.as_str())
            .map(|f| f.content.len() as u64)
    }

    fn realpath(&self, path: &NormalizedPath) -> NormalizedPath {
        path.clone()
    }

    fn watch_file(&self, path: &NormalizedPath) -> WatchId {
        let mut state = self.state();
        let id = WatchId(state.next_id());
        state.watchers.insert(id, WatchTarget::File(path.as_str().to_string()));
        id
    }

    fn watch_directory(&self, path: &NormalizedPath, recursive: bool) -> WatchId {
        let mut state = self.state();
        let id = WatchId(state.next_id());
        state.watchers.insert(
            id,
            WatchTarget::Directory {
                path: path.as_str().to_string(),
                recursive,
            },
        );
        id
    }

    fn close_watcher(&self, id: WatchId) {
        self.state().watchers.remove(&id);
    }

    fn set_timeout(&self, delay: Duration) -> TimerId {
        let mut state = self.state();
        let id = TimerId(state.next_id());
        let deadline = state.now + delay;
        state.timers.insert(id, deadline);
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        self.state().timers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch_events(host: &MemoryHost) -> Vec<(WatchId, String, WatchEventKind)> {
        host.take_events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Watch(w) => Some((w.id, w.path.as_str().to_string(), w.kind)),
                HostEvent::Timer(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_implied_directories() {
        let host = MemoryHost::new();
        host.add_file("/p/src/a.ts", "");
        host.add_file("/p/b.ts", "");
        assert!(host.directory_exists(&NormalizedPath::from_absolute("/p")));
        assert!(host.directory_exists(&NormalizedPath::from_absolute("/p/src")));
        assert!(!host.directory_exists(&NormalizedPath::from_absolute("/p/sr")));
        let entries = host.directory_entries(&NormalizedPath::from_absolute("/p"));
        assert_eq!(entries.files, vec!["b.ts"]);
        assert_eq!(entries.directories, vec!["src"]);
    }

    #[test]
    fn test_file_watcher_sees_create_change_delete() {
        let host = MemoryHost::new();
        let id = host.watch_file(&NormalizedPath::from_absolute("/p/tsconfig.json"));
        host.add_file("/p/tsconfig.json", "{}");
        host.add_file("/p/tsconfig.json", "{ }");
        host.delete_file("/p/tsconfig.json");
        let kinds: Vec<WatchEventKind> = watch_events(&host)
            .into_iter()
            .filter(|(w, _, _)| *w == id)
            .map(|(_, _, k)| k)
            .collect();
        assert_eq!(
            kinds,
            vec![WatchEventKind::Created, WatchEventKind::Changed, WatchEventKind::Deleted]
        );
    }

    #[test]
    fn test_non_recursive_directory_reports_new_child_directory() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "");
        host.watch_directory(&NormalizedPath::from_absolute("/p"), false);
        host.add_file("/p/node_modules/x/index.d.ts", "");
        host.add_file("/p/node_modules/y/index.d.ts", "");
        let events = watch_events(&host);
        // Only the first write created /p/node_modules.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "/p/node_modules");
        assert_eq!(events[0].2, WatchEventKind::Created);
    }

    #[test]
    fn test_recursive_directory_reports_nested_files() {
        let host = MemoryHost::new();
        host.watch_directory(&NormalizedPath::from_absolute("/p"), true);
        host.add_file("/p/src/deep/a.ts", "");
        let events = watch_events(&host);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "/p/src/deep/a.ts");
    }

    #[test]
    fn test_virtual_clock() {
        let host = MemoryHost::new();
        let late = host.set_timeout(Duration::from_millis(20));
        let early = host.set_timeout(Duration::from_millis(10));
        let cleared = host.set_timeout(Duration::from_millis(5));
        host.clear_timeout(cleared);
        assert!(host.advance(Duration::from_millis(9)).is_empty());
        assert_eq!(host.advance(Duration::from_millis(20)), vec![early, late]);
        assert_eq!(host.pending_timer_count(), 0);
    }

    #[test]
    fn test_mtime_moves_on_write() {
        let host = MemoryHost::new();
        let path = NormalizedPath::from_absolute("/p/a.ts");
        host.add_file("/p/a.ts", "1");
        let first = host.modified_time(&path);
        host.add_file("/p/a.ts", "2");
        assert_ne!(host.modified_time(&path), first);
        assert_eq!(host.file_size(&path), Some(1));
    }
}
