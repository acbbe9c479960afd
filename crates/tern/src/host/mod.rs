//
// host/mod.rs
//
// File system, watcher and timer collaborator of the project service
//

mod tokio_host;

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::error::HostError;
use crate::path::NormalizedPath;

pub use tokio_host::TokioHost;

/// Handle of a file or directory watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WatchId(pub u64);

/// Handle of a pending timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchEventKind {
    Created,
    Changed,
    Deleted,
}

/// A change observed by a watcher. For directory watchers `path` is the
/// entry that changed, not the watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub id: WatchId,
    pub path: NormalizedPath,
    pub kind: WatchEventKind,
}

/// Callbacks from the host, delivered to the owner of the project service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Timer(TimerId),
    Watch(WatchEvent),
}

/// Names of the entries of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntries {
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

/// Everything the project service needs from its environment.
///
/// All file access, watching and timing goes through this trait so the whole
/// service runs unchanged against an in-memory fake.
pub trait ServerHost: Send + Sync {
    fn use_case_sensitive_file_names(&self) -> bool;

    fn current_directory(&self) -> NormalizedPath;

    fn read_file(&self, path: &NormalizedPath) -> Result<String, HostError>;

    fn write_file(&self, path: &NormalizedPath, content: &str) -> Result<(), HostError>;

    fn file_exists(&self, path: &NormalizedPath) -> bool;

    fn directory_exists(&self, path: &NormalizedPath) -> bool;

    fn directory_entries(&self, path: &NormalizedPath) -> DirectoryEntries;

    fn modified_time(&self, path: &NormalizedPath) -> Option<SystemTime>;

    fn file_size(&self, path: &NormalizedPath) -> Option<u64>;

    /// Resolve symlinks. Returns the input when it cannot be resolved.
    fn realpath(&self, path: &NormalizedPath) -> NormalizedPath;

    /// Watch a single file, which may not exist yet.
    fn watch_file(&self, path: &NormalizedPath) -> WatchId;

    fn watch_directory(&self, path: &NormalizedPath, recursive: bool) -> WatchId;

    fn close_watcher(&self, id: WatchId);

    fn set_timeout(&self, delay: Duration) -> TimerId;

    fn clear_timeout(&self, id: TimerId);
}
