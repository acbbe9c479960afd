//
// service/mod.rs
//
// ProjectService: owner of every script info and project
//
// The service is single-threaded. Watch events and timers reach it through
// `on_watch_event` and `on_timer`, called by whoever drives the host's event
// channel.
//

mod background;
mod cleanup;
mod configured;
mod external;
mod inferred;
mod open_files;
pub mod watch;

#[cfg(test)]
mod integration_tests;

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::config::ProjectServiceConfig;
use crate::config_file::{CompilerOptions, ConfigFileRegistry, ReloadLevel};
use crate::error::{ProjectServiceError, Result};
use crate::events::{EventHandler, ProjectServiceEvent};
use crate::gc_timer::GcTimer;
use crate::host::{ServerHost, TimerId};
use crate::path::{CanonicalPath, NormalizedPath};
use crate::plugin::{PluginRegistry, ProjectPlugin};
use crate::project::{GraphUpdate, Project, ProjectId, ProjectInfo, ProjectKind, ProjectVariant, UpdateContext};
use crate::script_info::{ProjectRole, ScriptInfo};
use crate::script_registry::ScriptRegistry;
use crate::throttle::ThrottledOperations;

use watch::WatchRegistry;

pub use external::{ExternalFile, ExternalProjectRequest};
pub use open_files::{OpenFileRequest, OpenFileResult, TextEdit};

/// Work the service defers to a timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScheduledWork {
    UpdateProject(ProjectId),
    EnsureProjectsForOpenFiles,
}

/// Counters behind the `/dev/null/...` names of projects without a config.
#[derive(Debug, Default)]
struct NameCounters {
    inferred: u32,
    auto_import: u32,
    auxiliary: u32,
}

pub struct ProjectService {
    host: Arc<dyn ServerHost>,
    config: ProjectServiceConfig,
    current_directory: NormalizedPath,
    case_sensitive: bool,

    registry: ScriptRegistry,
    projects: IndexMap<ProjectId, Project>,
    next_project_id: u32,
    configured_projects: IndexMap<CanonicalPath, ProjectId>,
    external_projects: IndexMap<String, ProjectId>,
    /// External projects that listed config files instead of sources.
    external_project_configs: IndexMap<String, Vec<CanonicalPath>>,
    inferred_projects: Vec<ProjectId>,

    /// Open files with the project root the client gave for each.
    open_files: IndexMap<CanonicalPath, Option<NormalizedPath>>,
    config_files: ConfigFileRegistry,
    watches: WatchRegistry,
    /// Open files whose config discovery must run again.
    pending_config_rediscovery: IndexSet<CanonicalPath>,

    throttle: ThrottledOperations<ScheduledWork>,
    gc_timer: GcTimer,

    inferred_options: CompilerOptions,
    inferred_options_per_root: IndexMap<CanonicalPath, CompilerOptions>,
    plugins: PluginRegistry,
    event_handler: Option<EventHandler>,
    names: NameCounters,
}

impl ProjectService {
    pub fn new(host: Arc<dyn ServerHost>, config: ProjectServiceConfig) -> Self {
        config.log_summary();
        let case_sensitive = host.use_case_sensitive_file_names();
        let current_directory = host.current_directory();
        log::info!(
            "Project service started in {} (case sensitive: {})",
            current_directory,
            case_sensitive
        );
        Self {
            registry: ScriptRegistry::new(case_sensitive, config.max_text_versions),
            gc_timer: GcTimer::new(config.gc_delay()),
            plugins: PluginRegistry::new(config.global_plugins.clone()),
            host,
            config,
            current_directory,
            case_sensitive,
            projects: IndexMap::new(),
            next_project_id: 1,
            configured_projects: IndexMap::new(),
            external_projects: IndexMap::new(),
            external_project_configs: IndexMap::new(),
            inferred_projects: Vec::new(),
            open_files: IndexMap::new(),
            config_files: ConfigFileRegistry::new(),
            watches: WatchRegistry::new(),
            pending_config_rediscovery: IndexSet::new(),
            throttle: ThrottledOperations::new(),
            inferred_options: CompilerOptions::inferred_defaults(),
            inferred_options_per_root: IndexMap::new(),
            event_handler: None,
            names: NameCounters::default(),
        }
    }

    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.event_handler = Some(handler);
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn ProjectPlugin>) {
        self.plugins.register(plugin);
    }

    pub(crate) fn emit(&mut self, event: ProjectServiceEvent) {
        log::trace!("Event {}", event.name());
        if let Some(handler) = self.event_handler.as_mut() {
            handler(event);
        }
    }

    // Lookups.

    pub fn config(&self) -> &ProjectServiceConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn ServerHost> {
        &self.host
    }

    /// Normalize a client-supplied file name against the current directory.
    pub fn to_path(&self, file_name: &str) -> NormalizedPath {
        NormalizedPath::new(file_name, self.current_directory.as_str())
    }

    pub(crate) fn canonical(&self, file: &NormalizedPath) -> CanonicalPath {
        file.to_canonical(self.case_sensitive)
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn configured_project(&self, config_file: &NormalizedPath) -> Option<ProjectId> {
        self.configured_projects.get(&self.canonical(config_file)).copied()
    }

    pub fn external_project(&self, name: &str) -> Option<ProjectId> {
        self.external_projects.get(name).copied()
    }

    pub fn inferred_projects(&self) -> &[ProjectId] {
        &self.inferred_projects
    }

    pub fn script_info(&self, file: &NormalizedPath) -> Option<&ScriptInfo> {
        self.registry.get(&self.canonical(file))
    }

    pub fn script_infos(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn is_open(&self, file: &NormalizedPath) -> bool {
        self.open_files.contains_key(&self.canonical(file))
    }

    pub fn open_file_names(&self) -> Vec<NormalizedPath> {
        self.open_files
            .keys()
            .filter_map(|path| self.registry.get(path))
            .map(|info| info.file_name().clone())
            .collect()
    }

    pub fn config_files(&self) -> &ConfigFileRegistry {
        &self.config_files
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    // Project arena.

    fn allocate_project_id(&mut self) -> ProjectId {
        let id = ProjectId(self.next_project_id);
        self.next_project_id += 1;
        id
    }

    pub(crate) fn insert_project(&mut self, name: String, variant: ProjectVariant, options: CompilerOptions) -> ProjectId {
        let id = self.allocate_project_id();
        let mut project = Project::new(id, name, variant, options);
        project.set_plugins(self.plugins.enabled_for(project.options()));
        log::info!("Created {:?} project {} ({})", project.kind(), project.name(), id);
        self.projects.insert(id, project);
        id
    }

    /// Close a project and every background project serving it.
    pub(crate) fn close_project(&mut self, id: ProjectId) {
        let Some(mut project) = self.projects.shift_remove(&id) else {
            return;
        };
        let host = Arc::clone(&self.host);
        project.close(&*host, &mut self.registry, &mut self.watches);
        match project.variant() {
            ProjectVariant::Configured(state) => {
                if self.configured_projects.get(&state.config_key) == Some(&id) {
                    self.configured_projects.shift_remove(&state.config_key);
                }
            }
            ProjectVariant::External(state) => {
                if self.external_projects.get(&state.external_name) == Some(&id) {
                    self.external_projects.shift_remove(&state.external_name);
                }
            }
            ProjectVariant::Inferred(_) => self.inferred_projects.retain(|p| *p != id),
            ProjectVariant::AutoImportProvider { host_project } | ProjectVariant::Auxiliary { host_project } => {
                if let Some(host_project) = self.projects.get_mut(host_project) {
                    if host_project.auto_import_provider() == Some(id) {
                        host_project.set_auto_import_provider(None);
                    }
                }
            }
        }
        self.config_files
            .remove_project_everywhere(&*host, &mut self.watches, id);
        self.throttle.cancel(&*host, &ScheduledWork::UpdateProject(id));
        self.plugins.project_closed(project.name(), project.plugins());

        let children: Vec<ProjectId> = self
            .projects
            .values()
            .filter(|p| p.variant().host_project() == Some(id))
            .map(Project::id)
            .collect();
        for child in children {
            self.close_project(child);
        }
    }

    // Updates.

    /// Bring a project up to date now: apply a pending config reload, then
    /// rebuild its graph if it is dirty.
    pub fn update_project_graph(&mut self, id: ProjectId) -> Result<GraphUpdate> {
        self.load_pending_configured_project(id);
        if let Some(level) = self.pending_reload_of(id) {
            self.reload_configured_project(id, level)?;
        }
        let host = Arc::clone(&self.host);
        let project = self
            .projects
            .get_mut(&id)
            .ok_or(ProjectServiceError::ProjectNotFound(id))?;
        let mut ctx = UpdateContext {
            host: &*host,
            registry: &mut self.registry,
            watches: &mut self.watches,
            max_file_size: self.config.max_file_size,
            default_library: self.config.default_library.as_ref(),
        };
        let update = project.update_graph(&mut ctx)?;
        if update.has_new_program {
            log::trace!(
                "Project {} has a new program (+{} -{})",
                project.name(),
                update.added.len(),
                update.removed.len()
            );
        }
        for (file, file_size) in update.large_files.clone() {
            self.emit(ProjectServiceEvent::LargeFileReferenced {
                file,
                file_size,
                max_file_size: self.config.max_file_size,
            });
        }
        if update.has_new_program {
            self.refresh_auto_import_provider(id);
        }
        Ok(update)
    }

    /// Update a project as part of a batch: failures are logged and the
    /// batch continues.
    pub(crate) fn update_project_logged(&mut self, id: ProjectId) {
        match self.update_project_graph(id) {
            Ok(_) => {}
            Err(ProjectServiceError::ProjectNotFound(_)) => {
                log::trace!("Skipped update of closed project {}", id);
            }
            Err(e) => log::error!("Failed to update project {}: {}", id, e),
        }
    }

    /// Mark the project dirty and update it after the debounce delay.
    pub fn delay_update_project_graph(&mut self, id: ProjectId) {
        let Some(project) = self.projects.get_mut(&id) else {
            return;
        };
        project.mark_as_dirty();
        let host = Arc::clone(&self.host);
        self.throttle.schedule(
            &*host,
            ScheduledWork::UpdateProject(id),
            self.config.project_update_debounce(),
        );
    }

    pub(crate) fn delay_ensure_project_for_open_files(&mut self) {
        let host = Arc::clone(&self.host);
        self.throttle.schedule(
            &*host,
            ScheduledWork::EnsureProjectsForOpenFiles,
            self.config.ensure_projects_delay(),
        );
    }

    pub(crate) fn schedule_gc(&mut self) {
        let host = Arc::clone(&self.host);
        self.gc_timer.schedule_collect(&*host);
    }

    /// Dispatch a fired timer. Returns false for timers the service does not
    /// own.
    pub fn on_timer(&mut self, timer: TimerId) -> bool {
        if self.gc_timer.on_timer(timer) {
            self.collect_garbage();
            return true;
        }
        match self.throttle.on_timer(timer) {
            Some(ScheduledWork::UpdateProject(id)) => {
                self.update_project_logged(id);
                self.delay_ensure_project_for_open_files();
                true
            }
            Some(ScheduledWork::EnsureProjectsForOpenFiles) => {
                self.ensure_project_for_open_files();
                let open_files = self.open_file_names();
                self.emit(ProjectServiceEvent::ProjectsUpdatedInBackground { open_files });
                true
            }
            None => false,
        }
    }

    pub fn has_pending_work(&self) -> bool {
        !self.throttle.is_empty()
    }

    // Queries.

    /// Bring the project current and describe it.
    pub fn project_info(&mut self, id: ProjectId) -> Result<ProjectInfo> {
        self.update_project_graph(id)?;
        self.projects
            .get(&id)
            .map(Project::info)
            .ok_or(ProjectServiceError::ProjectNotFound(id))
    }

    fn project_role(&self, id: ProjectId, file: &CanonicalPath) -> Option<ProjectRole> {
        let project = self.projects.get(&id)?;
        let is_redirect_source = project.as_configured().is_some_and(|state| {
            state.project_references.iter().any(|reference| {
                self.configured_projects
                    .get(&self.canonical(&reference.path))
                    .and_then(|referenced| self.projects.get(referenced))
                    .is_some_and(|referenced| referenced.is_root(file))
            })
        });
        Some(ProjectRole {
            kind: project.kind(),
            is_redirect_source,
        })
    }

    /// The project that answers requests for `file`. With `ensure`, open
    /// files are reconciled first so a file whose project is pending is not
    /// reported as orphaned.
    pub fn get_default_project_for_file(&mut self, file: &NormalizedPath, ensure: bool) -> Result<ProjectId> {
        let path = self.canonical(file);
        if ensure {
            let needs_sweep = self.pending_config_rediscovery.contains(&path)
                || self
                    .registry
                    .get(&path)
                    .map_or(true, |info| info.is_orphan(|p| self.is_background(p)));
            if needs_sweep {
                self.ensure_project_for_open_files();
            }
        }
        let info = self
            .registry
            .get(&path)
            .ok_or_else(|| ProjectServiceError::ScriptInfoNotFound(file.clone()))?;
        info.default_project(|id| self.project_role(id, &path))
    }

    /// The default project for `file`, brought current.
    pub fn ensure_default_project_for_file(&mut self, file: &NormalizedPath) -> Result<ProjectId> {
        let id = self.get_default_project_for_file(file, true)?;
        self.update_project_graph(id)?;
        // The update may have dropped the file; ask again.
        self.get_default_project_for_file(file, false)
    }

    pub(crate) fn is_background(&self, id: ProjectId) -> bool {
        self.projects.get(&id).map_or(true, Project::is_background)
    }

    /// Re-read every config file and redo project assignment for all open
    /// files.
    pub fn reload_projects(&mut self) {
        log::info!("Reloading projects");
        let host = Arc::clone(&self.host);
        let keys: Vec<CanonicalPath> = self.config_files.keys().cloned().collect();
        for key in keys {
            let exists = self
                .config_files
                .get(&key)
                .is_some_and(|info| host.file_exists(info.config_file()));
            self.config_files.set_exists(&key, exists);
        }
        for (_, info) in self.registry.iter_mut() {
            if !info.is_open() {
                info.mark_changed_on_disk(&*host);
            }
        }
        for project in self.projects.values_mut() {
            project.mark_as_dirty();
        }
        let configured: Vec<ProjectId> = self.configured_projects.values().copied().collect();
        for id in configured {
            if let Err(e) = self.reload_configured_project(id, ReloadLevel::Full) {
                log::error!("Failed to reload project {}: {}", id, e);
            }
        }
        let open: Vec<CanonicalPath> = self.open_files.keys().cloned().collect();
        self.pending_config_rediscovery.extend(open);
        self.ensure_project_for_open_files();
    }

    /// Release memory held for files and projects nobody has open.
    fn collect_garbage(&mut self) {
        let mut with_open_files: HashSet<ProjectId> = HashSet::new();
        for path in self.open_files.keys() {
            if let Some(info) = self.registry.get(path) {
                with_open_files.extend(info.containing_projects().iter().copied());
            }
        }
        let host = Arc::clone(&self.host);
        let mut released_texts = 0;
        for (_, info) in self.registry.iter_mut() {
            if info.release_text(&*host) {
                released_texts += 1;
            }
        }
        let mut released_projects = 0;
        for (id, project) in self.projects.iter_mut() {
            if !with_open_files.contains(id) {
                project.release_caches();
                released_projects += 1;
            }
        }
        self.registry.shrink_to_fit();
        self.projects.shrink_to_fit();
        log::info!(
            "Collected garbage: {} closed file texts, {} idle project caches",
            released_texts,
            released_projects
        );
    }

    pub(crate) fn kind_of(&self, id: ProjectId) -> Option<ProjectKind> {
        self.projects.get(&id).map(Project::kind)
    }
}

impl std::fmt::Debug for ProjectService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectService")
            .field("projects", &self.projects.len())
            .field("script_infos", &self.registry.len())
            .field("open_files", &self.open_files.len())
            .field("config_files", &self.config_files.len())
            .field("watchers", &self.watches.len())
            .finish()
    }
}
