//
// service/external.rs
//
// Projects whose file list the client supplies
//

use std::sync::Arc;

use indexmap::IndexSet;
use serde::Deserialize;

use super::ProjectService;
use crate::config_file::{CompilerOptions, ReloadLevel};
use crate::events::ProjectServiceEvent;
use crate::path::{CanonicalPath, NormalizedPath};
use crate::project::{exceeds_non_ts_size_limit, ExternalState, Project, ProjectId, ProjectVariant};
use crate::script_info::ScriptKind;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFile {
    pub file_name: String,
    #[serde(default)]
    pub has_mixed_content: bool,
}

/// A project description sent by the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProjectRequest {
    pub project_file_name: String,
    #[serde(default)]
    pub root_files: Vec<ExternalFile>,
    #[serde(default)]
    pub options: CompilerOptions,
}

impl ProjectService {
    fn is_config_file_name(&self, file: &NormalizedPath) -> bool {
        self.config
            .config_file_names
            .iter()
            .any(|name| file.file_name().eq_ignore_ascii_case(name))
    }

    /// Open or update an external project.
    ///
    /// When the root list names config files, those become configured
    /// projects held open by this external project and no external project
    /// is created.
    pub fn open_external_project(&mut self, request: ExternalProjectRequest) {
        let name = request.project_file_name.clone();
        let mut config_roots: Vec<NormalizedPath> = Vec::new();
        let mut source_roots: Vec<NormalizedPath> = Vec::new();
        for root in &request.root_files {
            let file = self.to_path(&root.file_name);
            if self.is_config_file_name(&file) {
                config_roots.push(file);
            } else {
                if root.has_mixed_content {
                    self.registry.get_or_create(&file, ScriptKind::Unknown, true);
                }
                source_roots.push(file);
            }
        }

        if config_roots.is_empty() {
            self.release_external_config_refs(&name);
            self.open_plain_external_project(&name, source_roots, &request.options);
        } else {
            if let Some(id) = self.external_projects.get(&name).copied() {
                log::info!("External project {} now lists config files", name);
                self.close_project(id);
            }
            self.hold_configured_projects(&name, config_roots);
        }
        self.delay_ensure_project_for_open_files();
    }

    fn open_plain_external_project(&mut self, name: &str, roots: Vec<NormalizedPath>, request_options: &CompilerOptions) {
        let host = Arc::clone(&self.host);
        let mut options = CompilerOptions::default();
        options.merge(request_options);
        let oversized = exceeds_non_ts_size_limit(&*host, &options, &roots, self.config.max_non_ts_project_size);

        let (id, created) = match self.external_projects.get(name) {
            Some(id) => (*id, false),
            None => {
                let id = self.insert_project(
                    name.to_string(),
                    ProjectVariant::External(ExternalState {
                        external_name: name.to_string(),
                    }),
                    options.clone(),
                );
                self.external_projects.insert(name.to_string(), id);
                (id, true)
            }
        };
        let plugins = self.plugins.enabled_for(&options);
        let case_sensitive = self.case_sensitive;
        let Some(project) = self.projects.get_mut(&id) else {
            return;
        };
        project.set_compiler_options(options);
        project.set_plugins(plugins);
        project.set_root_files(roots, case_sensitive);
        let language_service_changed = match oversized {
            Some(file) => project.disable_language_service(Some(file)),
            None => project.enable_language_service(),
        };
        if language_service_changed {
            let event = ProjectServiceEvent::ProjectLanguageServiceState {
                project_name: project.name().to_string(),
                language_service_enabled: project.language_service_enabled(),
                last_file_exceeding_size_limit: project.last_file_exceeding_size_limit().cloned(),
            };
            self.emit(event);
        }
        if let Some(project) = self.projects.get(&id) {
            let external = self.plugins.external_files(project);
            if created {
                self.plugins.project_created(project);
            }
            if let Some(project) = self.projects.get_mut(&id) {
                project.set_external_files(external);
            }
        }

        if created {
            self.update_project_logged(id);
        } else {
            self.delay_update_project_graph(id);
        }
    }

    /// Make the external project `name` hold exactly the configured
    /// projects of `config_files`, creating missing ones for a deferred load.
    fn hold_configured_projects(&mut self, name: &str, config_files: Vec<NormalizedPath>) {
        let previous: IndexSet<CanonicalPath> = self
            .external_project_configs
            .get(name)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        let mut current: Vec<CanonicalPath> = Vec::new();
        for config_file in config_files {
            let key = self.canonical(&config_file);
            if current.contains(&key) {
                continue;
            }
            current.push(key.clone());
            if previous.contains(&key) {
                continue;
            }
            let id = match self.configured_projects.get(&key) {
                Some(id) => *id,
                None => {
                    let id = self.create_configured_project(&config_file);
                    if let Some(state) = self.projects.get_mut(&id).and_then(Project::as_configured_mut) {
                        state.initial_load_pending = true;
                    }
                    self.delay_update_project_graph(id);
                    id
                }
            };
            if let Some(state) = self.projects.get_mut(&id).and_then(Project::as_configured_mut) {
                state.external_project_refs += 1;
            }
        }
        for key in previous.iter().filter(|key| !current.contains(key)) {
            self.release_external_config_ref(key);
        }
        self.external_project_configs.insert(name.to_string(), current);
    }

    fn release_external_config_ref(&mut self, key: &CanonicalPath) {
        let Some(id) = self.configured_projects.get(key).copied() else {
            return;
        };
        if let Some(state) = self.projects.get_mut(&id).and_then(Project::as_configured_mut) {
            state.external_project_refs = state.external_project_refs.saturating_sub(1);
        }
    }

    fn release_external_config_refs(&mut self, name: &str) {
        if let Some(keys) = self.external_project_configs.shift_remove(name) {
            for key in &keys {
                self.release_external_config_ref(key);
            }
        }
    }

    /// Close an external project, or release the configured projects it
    /// held. Open files it contained are reassigned.
    pub fn close_external_project(&mut self, name: &str) {
        log::info!("Closing external project {}", name);
        self.release_external_config_refs(name);
        if let Some(id) = self.external_projects.get(name).copied() {
            self.close_project(id);
        }
        self.ensure_project_for_open_files();
    }

    /// Replace the whole set of external projects: every project not in
    /// `requests` is closed.
    pub fn open_external_projects(&mut self, requests: Vec<ExternalProjectRequest>) {
        let keep: IndexSet<String> = requests.iter().map(|r| r.project_file_name.clone()).collect();
        let stale: Vec<String> = self
            .external_projects
            .keys()
            .chain(self.external_project_configs.keys())
            .filter(|name| !keep.contains(*name))
            .cloned()
            .collect::<IndexSet<String>>()
            .into_iter()
            .collect();
        for name in stale {
            self.close_external_project(&name);
        }
        for request in requests {
            self.open_external_project(request);
        }
    }

    /// Names of the open external projects, including ones that only hold
    /// configured projects.
    pub fn external_project_names(&self) -> Vec<String> {
        self.external_projects
            .keys()
            .chain(self.external_project_configs.keys())
            .cloned()
            .collect::<IndexSet<String>>()
            .into_iter()
            .collect()
    }

    /// Force the initial load of a configured project created for an
    /// external project.
    pub(crate) fn load_pending_configured_project(&mut self, id: ProjectId) {
        let pending = self
            .projects
            .get(&id)
            .and_then(Project::as_configured)
            .is_some_and(|state| state.initial_load_pending);
        if !pending {
            return;
        }
        let name = self.projects.get(&id).map(|p| p.name().to_string()).unwrap_or_default();
        self.emit(ProjectServiceEvent::ProjectLoadingStart {
            project_name: name.clone(),
            reason: "Creating configured project in external project".to_string(),
        });
        if let Err(e) = self.reload_configured_project(id, ReloadLevel::Full) {
            log::error!("Failed to load project {}: {}", name, e);
        }
        self.emit(ProjectServiceEvent::ProjectLoadingFinish { project_name: name });
        if let Some(project) = self.projects.get(&id) {
            self.plugins.project_created(project);
        }
    }
}
