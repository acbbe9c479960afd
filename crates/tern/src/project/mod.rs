//
// project/mod.rs
//
// A root-file set with settings and a dirty-tracked program
//

mod auto_import;
mod graph;
mod kind;
mod references;
mod resolution;

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::config_file::{CompilerOptions, ConfigDiagnostic, TypeAcquisition, WatchOptions};
use crate::host::{ServerHost, WatchId};
use crate::path::{CanonicalPath, NormalizedPath};
use crate::script_registry::ScriptRegistry;
use crate::service::watch::WatchRegistry;

pub use auto_import::{auto_import_root_files, MAX_AUTO_IMPORT_DEPENDENCIES};
pub use graph::{exceeds_non_ts_size_limit, GraphUpdate, UpdateContext};
pub use kind::{ConfiguredState, ExternalState, InferredState, ProjectKind, ProjectVariant};
pub use references::{scan_references, FileReference, ReferenceKind};
pub use resolution::{resolve_reference, ResolutionCache, ResolvedModule};

/// Stable handle of a project in the service's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProjectId(pub u32);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a project for callers outside the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub name: String,
    pub kind: ProjectKind,
    pub files: Vec<NormalizedPath>,
    pub root_files: Vec<NormalizedPath>,
    pub program_version: u64,
    pub language_service_enabled: bool,
    pub config_errors: Vec<ConfigDiagnostic>,
}

pub struct Project {
    id: ProjectId,
    name: String,
    variant: ProjectVariant,
    root_files: IndexMap<CanonicalPath, NormalizedPath>,
    options: CompilerOptions,
    watch_options: Option<WatchOptions>,
    type_acquisition: TypeAcquisition,

    // Program state, rebuilt by `update_graph`.
    program_files: IndexMap<CanonicalPath, NormalizedPath>,
    file_versions: HashMap<CanonicalPath, u64>,
    unresolved: HashMap<CanonicalPath, Vec<FileReference>>,
    missing_files: IndexMap<CanonicalPath, (NormalizedPath, WatchId)>,
    failed_lookup_watchers: IndexMap<CanonicalPath, (NormalizedPath, WatchId)>,
    resolution_cache: ResolutionCache,
    reference_cache: HashMap<CanonicalPath, (u64, Vec<FileReference>)>,

    dirty: bool,
    options_changed: bool,
    state_version: u64,
    program_version: u64,
    language_service_enabled: bool,
    last_file_exceeding_size_limit: Option<NormalizedPath>,
    config_errors: Vec<ConfigDiagnostic>,
    plugins: Vec<String>,
    external_files: Vec<NormalizedPath>,
    auto_import_provider: Option<ProjectId>,
    closed: bool,
}

impl Project {
    pub fn new(id: ProjectId, name: String, variant: ProjectVariant, options: CompilerOptions) -> Self {
        let is_jsconfig = matches!(
            &variant,
            ProjectVariant::Configured(state) if state.config_file.file_name().eq_ignore_ascii_case("jsconfig.json")
        );
        Self {
            id,
            name,
            variant,
            root_files: IndexMap::new(),
            options,
            watch_options: None,
            type_acquisition: TypeAcquisition::default_for(is_jsconfig),
            program_files: IndexMap::new(),
            file_versions: HashMap::new(),
            unresolved: HashMap::new(),
            missing_files: IndexMap::new(),
            failed_lookup_watchers: IndexMap::new(),
            resolution_cache: ResolutionCache::new(),
            reference_cache: HashMap::new(),
            dirty: true,
            options_changed: false,
            state_version: 0,
            program_version: 0,
            language_service_enabled: true,
            last_file_exceeding_size_limit: None,
            config_errors: Vec::new(),
            plugins: Vec::new(),
            external_files: Vec::new(),
            auto_import_provider: None,
            closed: false,
        }
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProjectKind {
        self.variant.kind()
    }

    pub fn is_background(&self) -> bool {
        self.kind().is_background()
    }

    pub fn variant(&self) -> &ProjectVariant {
        &self.variant
    }

    pub fn variant_mut(&mut self) -> &mut ProjectVariant {
        &mut self.variant
    }

    pub fn as_configured(&self) -> Option<&ConfiguredState> {
        match &self.variant {
            ProjectVariant::Configured(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_configured_mut(&mut self) -> Option<&mut ConfiguredState> {
        match &mut self.variant {
            ProjectVariant::Configured(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_inferred(&self) -> Option<&InferredState> {
        match &self.variant {
            ProjectVariant::Inferred(state) => Some(state),
            _ => None,
        }
    }

    // Roots.

    pub fn root_files(&self) -> impl Iterator<Item = (&CanonicalPath, &NormalizedPath)> {
        self.root_files.iter()
    }

    pub fn root_file_names(&self) -> Vec<NormalizedPath> {
        self.root_files.values().cloned().collect()
    }

    pub fn root_count(&self) -> usize {
        self.root_files.len()
    }

    pub fn is_root(&self, path: &CanonicalPath) -> bool {
        self.root_files.contains_key(path)
    }

    pub fn add_root(&mut self, path: CanonicalPath, file_name: NormalizedPath) -> bool {
        if self.root_files.contains_key(&path) {
            return false;
        }
        self.root_files.insert(path, file_name);
        self.mark_as_dirty();
        true
    }

    pub fn remove_root(&mut self, path: &CanonicalPath) -> bool {
        if self.root_files.shift_remove(path).is_none() {
            return false;
        }
        self.mark_as_dirty();
        true
    }

    /// Replace the root set, keeping the given order. Marks the project
    /// dirty only when the set or its order changed.
    pub fn set_root_files(&mut self, files: Vec<NormalizedPath>, case_sensitive: bool) -> bool {
        let new_roots: IndexMap<CanonicalPath, NormalizedPath> = files
            .into_iter()
            .map(|file| (file.to_canonical(case_sensitive), file))
            .collect();
        let unchanged = new_roots.len() == self.root_files.len()
            && new_roots.keys().zip(self.root_files.keys()).all(|(a, b)| a == b);
        if unchanged {
            return false;
        }
        self.root_files = new_roots;
        self.mark_as_dirty();
        true
    }

    // Settings.

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Replace the compiler options. The resolution cache is dropped at the
    /// next update when they differ.
    pub fn set_compiler_options(&mut self, options: CompilerOptions) -> bool {
        if self.options == options {
            return false;
        }
        self.options = options;
        self.options_changed = true;
        self.mark_as_dirty();
        true
    }

    pub fn watch_options(&self) -> Option<&WatchOptions> {
        self.watch_options.as_ref()
    }

    pub fn set_watch_options(&mut self, watch_options: Option<WatchOptions>) {
        self.watch_options = watch_options;
    }

    pub fn type_acquisition(&self) -> &TypeAcquisition {
        &self.type_acquisition
    }

    pub fn set_type_acquisition(&mut self, type_acquisition: TypeAcquisition) {
        self.type_acquisition = type_acquisition;
    }

    pub fn config_errors(&self) -> &[ConfigDiagnostic] {
        &self.config_errors
    }

    pub fn set_config_errors(&mut self, errors: Vec<ConfigDiagnostic>) {
        self.config_errors = errors;
    }

    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    pub fn set_plugins(&mut self, plugins: Vec<String>) {
        self.plugins = plugins;
    }

    /// Files contributed by plugins, added after the roots.
    pub fn set_external_files(&mut self, files: Vec<NormalizedPath>) -> bool {
        if self.external_files == files {
            return false;
        }
        self.external_files = files;
        self.mark_as_dirty();
        true
    }

    pub fn auto_import_provider(&self) -> Option<ProjectId> {
        self.auto_import_provider
    }

    pub fn set_auto_import_provider(&mut self, provider: Option<ProjectId>) {
        self.auto_import_provider = provider;
    }

    // Dirty tracking.

    pub fn mark_as_dirty(&mut self) {
        self.state_version += 1;
        if !self.dirty {
            log::trace!("Project {} marked dirty", self.name);
        }
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Incremented on every `mark_as_dirty`.
    pub fn state_version(&self) -> u64 {
        self.state_version
    }

    /// Incremented by each update that produced a different program.
    pub fn program_version(&self) -> u64 {
        self.program_version
    }

    // Language service state.

    pub fn language_service_enabled(&self) -> bool {
        self.language_service_enabled
    }

    pub fn last_file_exceeding_size_limit(&self) -> Option<&NormalizedPath> {
        self.last_file_exceeding_size_limit.as_ref()
    }

    /// Returns true if the state changed.
    pub fn enable_language_service(&mut self) -> bool {
        if self.language_service_enabled {
            return false;
        }
        self.language_service_enabled = true;
        self.last_file_exceeding_size_limit = None;
        self.mark_as_dirty();
        true
    }

    /// Switch to syntax-only mode. Returns true if the state changed.
    pub fn disable_language_service(&mut self, last_file_exceeding_size_limit: Option<NormalizedPath>) -> bool {
        if !self.language_service_enabled {
            return false;
        }
        log::warn!(
            "Disabling language service for project {}{}",
            self.name,
            last_file_exceeding_size_limit
                .as_ref()
                .map(|f| format!(" (size limit exceeded by {})", f))
                .unwrap_or_default()
        );
        self.language_service_enabled = false;
        self.last_file_exceeding_size_limit = last_file_exceeding_size_limit;
        self.resolution_cache.clear();
        self.reference_cache.clear();
        self.mark_as_dirty();
        true
    }

    // Program queries.

    pub fn contains_file(&self, path: &CanonicalPath) -> bool {
        self.program_files.contains_key(path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&CanonicalPath, &NormalizedPath)> {
        self.program_files.iter()
    }

    pub fn program_files(&self) -> &IndexMap<CanonicalPath, NormalizedPath> {
        &self.program_files
    }

    pub fn file_count(&self) -> usize {
        self.program_files.len()
    }

    /// References of `path` that did not resolve in the last update.
    pub fn unresolved_references(&self, path: &CanonicalPath) -> &[FileReference] {
        self.unresolved.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn missing_files(&self) -> impl Iterator<Item = &NormalizedPath> {
        self.missing_files.values().map(|(file, _)| file)
    }

    pub fn failed_lookup_directories(&self) -> impl Iterator<Item = &NormalizedPath> {
        self.failed_lookup_watchers.values().map(|(dir, _)| dir)
    }

    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.resolution_cache
    }

    /// Forget resolutions a file-system change at `path` may affect.
    pub fn invalidate_resolutions_for(&mut self, path: &NormalizedPath) -> bool {
        self.resolution_cache.invalidate_for_path(path)
    }

    /// Drop caches that are rebuilt on demand.
    pub fn release_caches(&mut self) {
        self.resolution_cache.clear();
        self.resolution_cache.shrink_to_fit();
        self.reference_cache.clear();
        self.reference_cache.shrink_to_fit();
    }

    pub fn info(&self) -> ProjectInfo {
        ProjectInfo {
            name: self.name.clone(),
            kind: self.kind(),
            files: self.program_files.values().cloned().collect(),
            root_files: self.root_file_names(),
            program_version: self.program_version,
            language_service_enabled: self.language_service_enabled,
            config_errors: self.config_errors.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release every edge and watcher held by the project.
    pub fn close(&mut self, host: &dyn ServerHost, registry: &mut ScriptRegistry, watches: &mut WatchRegistry) {
        if self.closed {
            return;
        }
        log::info!("Closing project {}", self.name);
        for path in self.program_files.keys() {
            if let Some(info) = registry.get_mut(path) {
                info.detach_from_project(self.id);
            }
        }
        for (_, (_, watcher)) in self.missing_files.drain(..) {
            watches.close(host, watcher);
        }
        for (_, (_, watcher)) in self.failed_lookup_watchers.drain(..) {
            watches.close(host, watcher);
        }
        if let ProjectVariant::Configured(state) = &mut self.variant {
            for (_, (_, watcher)) in state.wildcard_watchers.drain(..) {
                watches.close(host, watcher);
            }
        }
        self.program_files.clear();
        self.file_versions.clear();
        self.unresolved.clear();
        self.release_caches();
        self.closed = true;
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("roots", &self.root_files.len())
            .field("files", &self.program_files.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
