//
// service/watch.rs
//
// Watcher bookkeeping and routing of watch events
//

use std::collections::HashMap;
use std::sync::Arc;

use crate::config_file::{ReloadLevel, WildcardMatcher};
use crate::host::{ServerHost, WatchEvent, WatchEventKind, WatchId};
use crate::path::{CanonicalPath, NormalizedPath};
use crate::project::{Project, ProjectId};

/// What a watcher was created for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchRoute {
    /// A config file (or a config it extends) in the existence cache.
    ConfigFile(CanonicalPath),
    /// An include directory of a configured project.
    WildcardDirectory {
        project: ProjectId,
        directory: NormalizedPath,
    },
    /// A closed script info.
    ScriptInfo(CanonicalPath),
    /// A root file of a project that does not exist yet.
    MissingFile {
        project: ProjectId,
        file: NormalizedPath,
    },
    /// A directory where module resolution looked without success.
    FailedLookup {
        project: ProjectId,
        directory: NormalizedPath,
    },
}

/// Every watcher the service holds, with its purpose.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    routes: HashMap<WatchId, WatchRoute>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_file(&mut self, host: &dyn ServerHost, path: &NormalizedPath, route: WatchRoute) -> WatchId {
        let id = host.watch_file(path);
        self.routes.insert(id, route);
        id
    }

    pub fn watch_directory(
        &mut self,
        host: &dyn ServerHost,
        path: &NormalizedPath,
        recursive: bool,
        route: WatchRoute,
    ) -> WatchId {
        let id = host.watch_directory(path, recursive);
        self.routes.insert(id, route);
        id
    }

    pub fn close(&mut self, host: &dyn ServerHost, id: WatchId) {
        if self.routes.remove(&id).is_some() {
            host.close_watcher(id);
        }
    }

    pub fn route(&self, id: WatchId) -> Option<&WatchRoute> {
        self.routes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Watchers whose route satisfies `pred`.
    pub fn count_matching(&self, pred: impl Fn(&WatchRoute) -> bool) -> usize {
        self.routes.values().filter(|r| pred(r)).count()
    }
}

impl super::ProjectService {
    /// Route a watcher notification to the reaction its watcher was
    /// created for. Reactions only mark state and schedule work; projects
    /// are rebuilt when the debounced timers fire.
    pub fn on_watch_event(&mut self, event: WatchEvent) {
        let Some(route) = self.watches.route(event.id).cloned() else {
            log::trace!("Ignoring event from closed watcher {:?}", event.id);
            return;
        };
        log::trace!("Watch event {:?} {} via {:?}", event.kind, event.path, route);
        match route {
            WatchRoute::ConfigFile(key) => self.on_config_file_event(&key, event.kind),
            WatchRoute::WildcardDirectory { project, .. } => self.on_wildcard_directory_event(project, &event.path),
            WatchRoute::ScriptInfo(path) => self.on_script_info_event(&path, event.kind),
            WatchRoute::MissingFile { project, file } => {
                if event.kind != WatchEventKind::Deleted {
                    if let Some(p) = self.projects.get_mut(&project) {
                        p.invalidate_resolutions_for(&file);
                    }
                    self.delay_update_project_graph(project);
                }
            }
            WatchRoute::FailedLookup { project, .. } => {
                let invalidated = self
                    .projects
                    .get_mut(&project)
                    .is_some_and(|p| p.invalidate_resolutions_for(&event.path));
                if invalidated {
                    self.delay_update_project_graph(project);
                }
            }
        }
    }

    fn on_config_file_event(&mut self, key: &CanonicalPath, kind: WatchEventKind) {
        let host = Arc::clone(&self.host);
        let Some(config_file) = self.config_files.get(key).map(|info| info.config_file().clone()) else {
            return;
        };
        let exists = kind != WatchEventKind::Deleted && host.file_exists(&config_file);
        let flipped = self.config_files.set_exists(key, exists);
        log::info!(
            "Config file {} {}",
            config_file,
            match (exists, flipped) {
                (true, true) => "created",
                (true, false) => "changed",
                _ => "deleted",
            }
        );

        for id in self.config_files.projects_of(key) {
            let Some(state) = self.projects.get_mut(&id).and_then(Project::as_configured_mut) else {
                continue;
            };
            if &state.config_key == key && !exists {
                self.close_project_for_missing_config(id);
                continue;
            }
            // An extended config changed: the extending config must be
            // re-parsed too.
            state.pending_reload = ReloadLevel::Full;
            let own_key = state.config_key.clone();
            self.config_files.invalidate_parse(&own_key);
            self.delay_update_project_graph(id);
        }

        if flipped {
            let impacted = self.config_files.open_files_impacted(key);
            if !impacted.is_empty() {
                self.pending_config_rediscovery.extend(impacted);
                self.delay_ensure_project_for_open_files();
            }
        }
    }

    fn on_wildcard_directory_event(&mut self, id: ProjectId, path: &NormalizedPath) {
        let case_sensitive = self.case_sensitive;
        let key = self.canonical(path);
        if self.config.config_file_names.iter().any(|name| path.file_name() == name) {
            return;
        }
        let Some(project) = self.projects.get_mut(&id) else {
            return;
        };
        project.invalidate_resolutions_for(path);
        let Some(specs) = project.as_configured().and_then(|state| state.specs.clone()) else {
            return;
        };
        // Names without an extension are directories appearing or vanishing.
        let relevant = !path.file_name().contains('.')
            || project.contains_file(&key)
            || WildcardMatcher::new(&specs, project.options(), case_sensitive)
                .map(|matcher| matcher.matches_file(path))
                .unwrap_or(true);
        if !relevant {
            return;
        }
        if let Some(state) = project.as_configured_mut() {
            state.pending_reload = state.pending_reload.max(ReloadLevel::Partial);
        }
        self.delay_update_project_graph(id);
    }

    fn on_script_info_event(&mut self, path: &CanonicalPath, kind: WatchEventKind) {
        let host = Arc::clone(&self.host);
        let Some(info) = self.registry.get_mut(path) else {
            return;
        };
        if info.is_open() {
            if kind == WatchEventKind::Deleted {
                info.set_deleted_on_disk(true);
            }
            return;
        }
        let file = info.file_name().clone();
        let containing = info.containing_projects().to_vec();
        match kind {
            WatchEventKind::Deleted => {
                log::info!("{} was deleted", file);
                info.set_deleted_on_disk(true);
                info.detach_all_projects();
                let watcher = info.set_file_watcher(None);
                self.registry.remove(path);
                if let Some(watcher) = watcher {
                    self.watches.close(&*host, watcher);
                }
                for id in containing {
                    if let Some(project) = self.projects.get_mut(&id) {
                        project.invalidate_resolutions_for(&file);
                    }
                    self.delay_update_project_graph(id);
                }
            }
            WatchEventKind::Created | WatchEventKind::Changed => {
                if info.mark_changed_on_disk(&*host) {
                    for id in containing {
                        self.delay_update_project_graph(id);
                    }
                }
            }
        }
    }
}
