//
// host/tokio_host.rs
//
// Host backed by the real file system, notify watchers and tokio timers
//

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{DirectoryEntries, HostEvent, ServerHost, TimerId, WatchEvent, WatchEventKind, WatchId};
use crate::error::HostError;
use crate::path::NormalizedPath;

type TimerMap = Arc<Mutex<HashMap<TimerId, CancellationToken>>>;

/// [`ServerHost`] for a running server.
///
/// Timer expirations and watcher notifications are sent as [`HostEvent`]s on
/// the channel returned by [`TokioHost::new`]; the receiving task feeds them
/// back into the project service.
pub struct TokioHost {
    runtime: Handle,
    events: mpsc::UnboundedSender<HostEvent>,
    current_directory: NormalizedPath,
    case_sensitive: bool,
    next_id: AtomicU64,
    timers: TimerMap,
    watchers: Mutex<HashMap<WatchId, RecommendedWatcher>>,
}

impl TokioHost {
    /// Create a host bound to the current tokio runtime.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<HostEvent>), HostError> {
        let runtime = Handle::try_current().map_err(|e| HostError::Runtime(e.to_string()))?;
        let cwd = std::env::current_dir().map_err(|e| HostError::io(".", e))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Self {
            runtime,
            events: tx,
            current_directory: NormalizedPath::from_absolute(&cwd.to_string_lossy()),
            case_sensitive: !cfg!(any(windows, target_os = "macos")),
            next_id: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
            watchers: Mutex::new(HashMap::new()),
        };
        Ok((host, rx))
    }

    /// Override the directory relative file names resolve against.
    pub fn with_current_directory(mut self, dir: NormalizedPath) -> Self {
        self.current_directory = dir;
        self
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start a notify watcher on `target`. When `only` is set, events for
    /// other paths are dropped.
    fn start_watcher(
        &self,
        id: WatchId,
        target: &Path,
        mode: RecursiveMode,
        only: Option<NormalizedPath>,
    ) -> notify::Result<RecommendedWatcher> {
        let events = self.events.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Watcher {:?} error: {}", id, e);
                        return;
                    }
                };
                let Some(kind) = watch_event_kind(&event.kind) else {
                    return;
                };
                for path in &event.paths {
                    let path = NormalizedPath::from_absolute(&path.to_string_lossy());
                    if only.as_ref().is_some_and(|only| only != &path) {
                        continue;
                    }
                    let _ = events.send(HostEvent::Watch(WatchEvent { id, path, kind }));
                }
            },
            Config::default(),
        )?;
        watcher.watch(target, mode)?;
        Ok(watcher)
    }

    fn register_watcher(&self, id: WatchId, result: notify::Result<RecommendedWatcher>, what: &str) {
        match result {
            Ok(watcher) => {
                self.watchers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id, watcher);
            }
            Err(e) => log::warn!("Failed to watch {}: {}", what, e),
        }
    }
}

fn watch_event_kind(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Modify(_) => Some(WatchEventKind::Changed),
        EventKind::Remove(_) => Some(WatchEventKind::Deleted),
        _ => None,
    }
}

impl ServerHost for TokioHost {
    fn use_case_sensitive_file_names(&self) -> bool {
        self.case_sensitive
    }

    fn current_directory(&self) -> NormalizedPath {
        self.current_directory.clone()
    }

    fn read_file(&self, path: &NormalizedPath) -> Result<String, HostError> {
        let bytes = std::fs::read(path.to_path_buf()).map_err(|e| HostError::io(path.as_str(), e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write_file(&self, path: &NormalizedPath, content: &str) -> Result<(), HostError> {
        std::fs::write(path.to_path_buf(), content).map_err(|e| HostError::io(path.as_str(), e))
    }

    fn file_exists(&self, path: &NormalizedPath) -> bool {
        path.to_path_buf().is_file()
    }

    fn directory_exists(&self, path: &NormalizedPath) -> bool {
        path.to_path_buf().is_dir()
    }

    fn directory_entries(&self, path: &NormalizedPath) -> DirectoryEntries {
        let mut entries = DirectoryEntries::default();
        let Ok(read_dir) = std::fs::read_dir(path.to_path_buf()) else {
            return entries;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => entries.directories.push(name),
                Ok(ft) if ft.is_file() => entries.files.push(name),
                // Follow symlinks to decide.
                Ok(_) => {
                    if entry.path().is_dir() {
                        entries.directories.push(name);
                    } else {
                        entries.files.push(name);
                    }
                }
                Err(_) => {}
            }
        }
        entries.files.sort();
        entries.directories.sort();
        entries
    }

    fn modified_time(&self, path: &NormalizedPath) -> Option<SystemTime> {
        std::fs::metadata(path.to_path_buf())
            .and_then(|m| m.modified())
            .ok()
    }

    fn file_size(&self, path: &NormalizedPath) -> Option<u64> {
        std::fs::metadata(path.to_path_buf()).ok().map(|m| m.len())
    }

    fn realpath(&self, path: &NormalizedPath) -> NormalizedPath {
        match std::fs::canonicalize(path.to_path_buf()) {
            Ok(real) => NormalizedPath::from_absolute(&real.to_string_lossy()),
            Err(_) => path.clone(),
        }
    }

    fn watch_file(&self, path: &NormalizedPath) -> WatchId {
        let id = WatchId(self.next_id());
        // Watch the parent so creation and deletion are observed too.
        let Some(parent) = path.parent() else {
            return id;
        };
        let result = self.start_watcher(
            id,
            &parent.to_path_buf(),
            RecursiveMode::NonRecursive,
            Some(path.clone()),
        );
        self.register_watcher(id, result, path.as_str());
        log::trace!("Watching file {} as {:?}", path, id);
        id
    }

    fn watch_directory(&self, path: &NormalizedPath, recursive: bool) -> WatchId {
        let id = WatchId(self.next_id());
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        let result = self.start_watcher(id, &path.to_path_buf(), mode, None);
        self.register_watcher(id, result, path.as_str());
        log::trace!("Watching directory {} (recursive: {}) as {:?}", path, recursive, id);
        id
    }

    fn close_watcher(&self, id: WatchId) {
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn set_timeout(&self, delay: Duration) -> TimerId {
        let id = TimerId(self.next_id());
        let token = CancellationToken::new();
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());

        let events = self.events.clone();
        let timers = Arc::clone(&self.timers);
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    timers.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
                    let _ = events.send(HostEvent::Timer(id));
                }
            }
        });
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        if let Some(token) = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
        {
            token.cancel();
        }
    }
}
