//
// service/configured.rs
//
// Loading, reloading and reference walking for configured projects
//

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::ProjectService;
use crate::config_file::{parse_config_file, refresh_file_names, CompilerOptions, ParsedConfig, ReloadLevel};
use crate::error::{ProjectServiceError, Result};
use crate::events::ProjectServiceEvent;
use crate::path::{CanonicalPath, NormalizedPath};
use crate::project::{exceeds_non_ts_size_limit, ConfiguredState, Project, ProjectId, ProjectVariant};
use crate::service::watch::WatchRoute;

impl ProjectService {
    /// The reload a configured project is waiting for, if any.
    pub(crate) fn pending_reload_of(&self, id: ProjectId) -> Option<ReloadLevel> {
        let state = self.projects.get(&id)?.as_configured()?;
        if state.initial_load_pending {
            return Some(ReloadLevel::Full);
        }
        (state.pending_reload > ReloadLevel::None).then_some(state.pending_reload)
    }

    /// Register a configured project for `config_file` without reading it.
    pub(crate) fn create_configured_project(&mut self, config_file: &NormalizedPath) -> ProjectId {
        let key = self.canonical(config_file);
        let id = self.insert_project(
            config_file.as_str().to_string(),
            ProjectVariant::Configured(ConfiguredState::new(config_file.clone(), key.clone())),
            CompilerOptions::default(),
        );
        self.configured_projects.insert(key.clone(), id);
        let host = Arc::clone(&self.host);
        self.config_files
            .add_project(&*host, &mut self.watches, &key, config_file, id);
        id
    }

    /// Create a configured project and read its config right away.
    pub(crate) fn create_and_load_configured_project(
        &mut self,
        config_file: &NormalizedPath,
        reason: String,
    ) -> Result<ProjectId> {
        let id = self.create_configured_project(config_file);
        self.emit(ProjectServiceEvent::ProjectLoadingStart {
            project_name: config_file.as_str().to_string(),
            reason,
        });
        let loaded = self.reload_configured_project(id, ReloadLevel::Full);
        self.emit(ProjectServiceEvent::ProjectLoadingFinish {
            project_name: config_file.as_str().to_string(),
        });
        loaded?;
        if let Some(project) = self.projects.get(&id) {
            self.plugins.project_created(project);
        }
        Ok(id)
    }

    /// Re-read the config of a configured project.
    ///
    /// `Partial` only re-expands the file list from the stored specs. A
    /// project whose config no longer exists is closed and its open files
    /// are queued for reassignment.
    pub(crate) fn reload_configured_project(&mut self, id: ProjectId, level: ReloadLevel) -> Result<()> {
        let host = Arc::clone(&self.host);
        let (config_file, key, initial) = {
            let state = self
                .projects
                .get(&id)
                .and_then(Project::as_configured)
                .ok_or(ProjectServiceError::ProjectNotFound(id))?;
            (
                state.config_file.clone(),
                state.config_key.clone(),
                state.initial_load_pending || state.specs.is_none(),
            )
        };

        if !self.config_files.exists(&*host, &key, &config_file) {
            log::info!("Config file {} is gone, closing its project", config_file);
            self.close_project_for_missing_config(id);
            return Ok(());
        }

        log::info!("Reloading configured project {} ({:?})", config_file, level);
        let parsed = match self.config_files.cached_parse(&key).cloned() {
            Some(mut parsed) => {
                if level == ReloadLevel::Partial {
                    refresh_file_names(&*host, &mut parsed, self.case_sensitive);
                }
                parsed
            }
            None => parse_config_file(&*host, &config_file, self.case_sensitive),
        };
        self.config_files.set_parsed(&key, parsed.clone());
        self.apply_parsed_config(id, &parsed)?;

        if !initial && level == ReloadLevel::Full {
            if let Some(project) = self.projects.get(&id) {
                self.plugins.config_changed(project);
            }
            self.emit(ProjectServiceEvent::ConfigFileDiag {
                trigger_file: config_file.clone(),
                config_file,
                diagnostics: parsed.errors,
            });
        }
        Ok(())
    }

    fn apply_parsed_config(&mut self, id: ProjectId, parsed: &ParsedConfig) -> Result<()> {
        let host = Arc::clone(&self.host);
        let case_sensitive = self.case_sensitive;
        let plugins = self.plugins.enabled_for(&parsed.options);
        let oversized = exceeds_non_ts_size_limit(
            &*host,
            &parsed.options,
            &parsed.file_names,
            self.config.max_non_ts_project_size,
        );

        let project = self
            .projects
            .get_mut(&id)
            .ok_or(ProjectServiceError::ProjectNotFound(id))?;
        project.set_compiler_options(parsed.options.clone());
        project.set_watch_options(parsed.watch_options.clone());
        project.set_type_acquisition(parsed.type_acquisition.clone());
        project.set_root_files(parsed.file_names.clone(), case_sensitive);
        project.set_config_errors(parsed.errors.clone());
        project.set_plugins(plugins);
        project.mark_as_dirty();

        let language_service_changed = match &oversized {
            Some(file) => project.disable_language_service(Some(file.clone())),
            None => project.enable_language_service(),
        };
        let state_event = language_service_changed.then(|| ProjectServiceEvent::ProjectLanguageServiceState {
            project_name: project.name().to_string(),
            language_service_enabled: project.language_service_enabled(),
            last_file_exceeding_size_limit: project.last_file_exceeding_size_limit().cloned(),
        });

        let extended: Vec<(CanonicalPath, NormalizedPath)> = parsed
            .extended_config_files
            .iter()
            .map(|file| (file.to_canonical(case_sensitive), file.clone()))
            .collect();
        let previous_extended = {
            let state = project
                .as_configured_mut()
                .ok_or(ProjectServiceError::ProjectNotFound(id))?;
            state.project_references = parsed.project_references.clone();
            state.specs = Some(parsed.specs.clone());
            state.pending_reload = ReloadLevel::None;
            state.initial_load_pending = false;

            let mut stale = std::mem::take(&mut state.wildcard_watchers);
            for (directory, recursive) in &parsed.wildcard_directories {
                match stale.shift_remove(directory) {
                    Some((was_recursive, watcher)) if was_recursive == *recursive => {
                        state
                            .wildcard_watchers
                            .insert(directory.clone(), (was_recursive, watcher));
                    }
                    previous => {
                        if let Some((_, watcher)) = previous {
                            self.watches.close(&*host, watcher);
                        }
                        let watcher = self.watches.watch_directory(
                            &*host,
                            directory,
                            *recursive,
                            WatchRoute::WildcardDirectory {
                                project: id,
                                directory: directory.clone(),
                            },
                        );
                        state
                            .wildcard_watchers
                            .insert(directory.clone(), (*recursive, watcher));
                    }
                }
            }
            for (_, (_, watcher)) in stale {
                self.watches.close(&*host, watcher);
            }

            std::mem::replace(
                &mut state.extended_configs,
                extended.iter().map(|(key, _)| key.clone()).collect(),
            )
        };

        for (key, file) in &extended {
            if !previous_extended.contains(key) {
                self.config_files
                    .add_project(&*host, &mut self.watches, key, file, id);
            }
        }
        for key in &previous_extended {
            if !extended.iter().any(|(k, _)| k == key) {
                self.config_files
                    .remove_project(&*host, &mut self.watches, key, id);
            }
        }

        if let Some(project) = self.projects.get(&id) {
            let external = self.plugins.external_files(project);
            if let Some(project) = self.projects.get_mut(&id) {
                project.set_external_files(external);
            }
        }
        if let Some(event) = state_event {
            self.emit(event);
        }
        Ok(())
    }

    pub(crate) fn close_project_for_missing_config(&mut self, id: ProjectId) {
        let Some(project) = self.projects.get(&id) else {
            return;
        };
        let affected: Vec<CanonicalPath> = self
            .open_files
            .keys()
            .filter(|path| project.contains_file(path))
            .cloned()
            .collect();
        self.close_project(id);
        self.pending_config_rediscovery.extend(affected);
        self.delay_ensure_project_for_open_files();
    }

    /// Find a project among the ones `root` references, transitively, that
    /// contains `file`. Referenced projects are created on the way.
    pub(crate) fn find_project_in_references(&mut self, root: ProjectId, file: &CanonicalPath) -> Option<ProjectId> {
        let host = Arc::clone(&self.host);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let references = self
                .projects
                .get(&id)
                .and_then(Project::as_configured)
                .map(|state| state.project_references.clone())
                .unwrap_or_default();
            for reference in references {
                let key = self.canonical(&reference.path);
                if !self.config_files.exists(&*host, &key, &reference.path) {
                    continue;
                }
                let referenced = match self.configured_projects.get(&key) {
                    Some(existing) => *existing,
                    None => {
                        let reason = format!("Creating project referenced by {}", id);
                        match self.create_and_load_configured_project(&reference.path, reason) {
                            Ok(created) => created,
                            Err(e) => {
                                log::error!("Failed to load referenced project {}: {}", reference.path, e);
                                continue;
                            }
                        }
                    }
                };
                self.update_project_logged(referenced);
                if self
                    .projects
                    .get(&referenced)
                    .is_some_and(|project| project.contains_file(file))
                {
                    return Some(referenced);
                }
                queue.push_back(referenced);
            }
        }
        None
    }
}
