//
// config_file/existence.rs
//
// Ref-counted cache of config file existence and parse results
//

use indexmap::{IndexMap, IndexSet};

use super::parse::ParsedConfig;
use crate::host::{ServerHost, WatchId};
use crate::path::{CanonicalPath, NormalizedPath};
use crate::project::ProjectId;
use crate::service::watch::{WatchRegistry, WatchRoute};

/// What is known about one config file path.
///
/// The entry lives as long as some open file's config discovery visited
/// this path or some project depends on the config, and it owns exactly one
/// file watcher for that whole lifetime.
#[derive(Debug)]
pub struct ConfigFileExistenceInfo {
    config_file: NormalizedPath,
    exists: bool,
    open_files_impacted: IndexSet<CanonicalPath>,
    projects: IndexSet<ProjectId>,
    parsed: Option<ParsedConfig>,
    watcher: Option<WatchId>,
}

impl ConfigFileExistenceInfo {
    pub fn config_file(&self) -> &NormalizedPath {
        &self.config_file
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn open_files_impacted(&self) -> impl Iterator<Item = &CanonicalPath> {
        self.open_files_impacted.iter()
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectId> {
        self.projects.iter()
    }

    pub fn parsed(&self) -> Option<&ParsedConfig> {
        self.parsed.as_ref()
    }

    pub fn watcher(&self) -> Option<WatchId> {
        self.watcher
    }

    pub fn ref_count(&self) -> usize {
        self.open_files_impacted.len() + self.projects.len()
    }
}

/// All config-file cache entries, keyed by canonical config path.
#[derive(Debug, Default)]
pub struct ConfigFileRegistry {
    entries: IndexMap<CanonicalPath, ConfigFileExistenceInfo>,
}

impl ConfigFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CanonicalPath) -> Option<&ConfigFileExistenceInfo> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CanonicalPath> {
        self.entries.keys()
    }

    /// Whether the config exists, from the cache when an entry is present.
    pub fn exists(&self, host: &dyn ServerHost, key: &CanonicalPath, config_file: &NormalizedPath) -> bool {
        match self.entries.get(key) {
            Some(info) => info.exists,
            None => host.file_exists(config_file),
        }
    }

    fn entry(
        &mut self,
        host: &dyn ServerHost,
        watches: &mut WatchRegistry,
        key: &CanonicalPath,
        config_file: &NormalizedPath,
    ) -> &mut ConfigFileExistenceInfo {
        self.entries.entry(key.clone()).or_insert_with(|| {
            let watcher = watches.watch_file(host, config_file, WatchRoute::ConfigFile(key.clone()));
            log::trace!("Caching config file {} (watcher {:?})", config_file, watcher);
            ConfigFileExistenceInfo {
                config_file: config_file.clone(),
                exists: host.file_exists(config_file),
                open_files_impacted: IndexSet::new(),
                projects: IndexSet::new(),
                parsed: None,
                watcher: Some(watcher),
            }
        })
    }

    /// Record that config discovery for `open_file` checked this config.
    /// Returns whether the config exists.
    pub fn add_open_file(
        &mut self,
        host: &dyn ServerHost,
        watches: &mut WatchRegistry,
        key: &CanonicalPath,
        config_file: &NormalizedPath,
        open_file: &CanonicalPath,
    ) -> bool {
        let info = self.entry(host, watches, key, config_file);
        info.open_files_impacted.insert(open_file.clone());
        info.exists
    }

    pub fn add_project(
        &mut self,
        host: &dyn ServerHost,
        watches: &mut WatchRegistry,
        key: &CanonicalPath,
        config_file: &NormalizedPath,
        project: ProjectId,
    ) {
        let info = self.entry(host, watches, key, config_file);
        info.projects.insert(project);
    }

    /// Drop every reference held by `open_file`.
    pub fn remove_open_file(&mut self, host: &dyn ServerHost, watches: &mut WatchRegistry, open_file: &CanonicalPath) {
        let keys: Vec<CanonicalPath> = self
            .entries
            .iter_mut()
            .filter_map(|(key, info)| info.open_files_impacted.shift_remove(open_file).then(|| key.clone()))
            .collect();
        for key in keys {
            self.release_if_unreferenced(host, watches, &key);
        }
    }

    pub fn remove_project(
        &mut self,
        host: &dyn ServerHost,
        watches: &mut WatchRegistry,
        key: &CanonicalPath,
        project: ProjectId,
    ) {
        if let Some(info) = self.entries.get_mut(key) {
            info.projects.shift_remove(&project);
        }
        self.release_if_unreferenced(host, watches, key);
    }

    /// Drop every reference held by `project`.
    pub fn remove_project_everywhere(&mut self, host: &dyn ServerHost, watches: &mut WatchRegistry, project: ProjectId) {
        let keys: Vec<CanonicalPath> = self
            .entries
            .iter_mut()
            .filter_map(|(key, info)| info.projects.shift_remove(&project).then(|| key.clone()))
            .collect();
        for key in keys {
            self.release_if_unreferenced(host, watches, &key);
        }
    }

    fn release_if_unreferenced(&mut self, host: &dyn ServerHost, watches: &mut WatchRegistry, key: &CanonicalPath) {
        let Some(info) = self.entries.get(key) else {
            return;
        };
        if info.ref_count() > 0 {
            return;
        }
        if let Some(info) = self.entries.shift_remove(key) {
            if let Some(watcher) = info.watcher {
                watches.close(host, watcher);
            }
            log::trace!("Released config file cache entry {}", info.config_file);
        }
    }

    /// Update existence after a watcher event; drops a stale parse.
    /// Returns true when the existence flag flipped.
    pub fn set_exists(&mut self, key: &CanonicalPath, exists: bool) -> bool {
        let Some(info) = self.entries.get_mut(key) else {
            return false;
        };
        info.parsed = None;
        let flipped = info.exists != exists;
        info.exists = exists;
        flipped
    }

    pub fn cached_parse(&self, key: &CanonicalPath) -> Option<&ParsedConfig> {
        self.entries.get(key).and_then(|info| info.parsed.as_ref())
    }

    pub fn set_parsed(&mut self, key: &CanonicalPath, parsed: ParsedConfig) {
        if let Some(info) = self.entries.get_mut(key) {
            info.parsed = Some(parsed);
        }
    }

    pub fn invalidate_parse(&mut self, key: &CanonicalPath) {
        if let Some(info) = self.entries.get_mut(key) {
            info.parsed = None;
        }
    }

    pub fn open_files_impacted(&self, key: &CanonicalPath) -> Vec<CanonicalPath> {
        self.entries
            .get(key)
            .map(|info| info.open_files_impacted.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn projects_of(&self, key: &CanonicalPath) -> Vec<ProjectId> {
        self.entries
            .get(key)
            .map(|info| info.projects.iter().copied().collect())
            .unwrap_or_default()
    }
}
