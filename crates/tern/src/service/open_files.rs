//
// service/open_files.rs
//
// Opening, editing and closing client files, and assigning them to projects
//

use std::sync::Arc;

use serde::Deserialize;

use super::ProjectService;
use crate::config_file::ConfigDiagnostic;
use crate::error::{ProjectServiceError, Result};
use crate::events::ProjectServiceEvent;
use crate::path::{CanonicalPath, NormalizedPath};
use crate::project::{ProjectId, ProjectKind};
use crate::script_info::ScriptKind;
use crate::service::watch::WatchRoute;
use crate::text::LineOffset;

/// What opening a file found out about its configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenFileResult {
    /// The config file whose project now serves the file.
    pub configured_project: Option<NormalizedPath>,
    pub config_file_errors: Vec<ConfigDiagnostic>,
}

/// One file to open in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFileRequest {
    pub file: NormalizedPath,
    pub content: Option<String>,
    pub kind: ScriptKind,
    pub project_root: Option<NormalizedPath>,
}

/// Replace the text between two 1-based positions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub start: LineOffset,
    pub end: LineOffset,
    pub new_text: String,
}

impl ProjectService {
    /// Open `file` for the client and attach it to a project.
    ///
    /// `content` replaces the disk content while the file is open. The
    /// file joins an external project that lists it, else the configured
    /// project found by config discovery, else an inferred project.
    pub fn open_client_file(
        &mut self,
        file: &NormalizedPath,
        content: Option<String>,
        kind: ScriptKind,
        project_root: Option<NormalizedPath>,
    ) -> Result<OpenFileResult> {
        let path = self.open_script_info(file, content, kind, project_root);
        let result = self.assign_project_to_opened_file(&path)?;
        self.cleanup_projects_and_script_infos();
        self.schedule_gc();
        Ok(result)
    }

    /// Register the open state of a file without touching projects.
    fn open_script_info(
        &mut self,
        file: &NormalizedPath,
        content: Option<String>,
        kind: ScriptKind,
        project_root: Option<NormalizedPath>,
    ) -> CanonicalPath {
        let host = Arc::clone(&self.host);
        let path = self.canonical(file);
        let (info, _) = self.registry.get_or_create(file, kind, false);
        if let Some(watcher) = info.set_file_watcher(None) {
            self.watches.close(&*host, watcher);
        }
        // Disk content seeds the open buffer.
        let loaded = content.is_none()
            && !info.is_dynamic()
            && info.ensure_loaded(&*host, self.config.max_file_size).changed;
        let changed = info.open(content) || loaded;
        let containing = info.containing_projects().to_vec();
        if changed {
            for id in containing {
                if let Some(project) = self.projects.get_mut(&id) {
                    project.mark_as_dirty();
                }
            }
        }
        log::info!("Opened {}", file);
        self.open_files.insert(path.clone(), project_root);
        path
    }

    /// Walk up from the open file looking for a config file.
    ///
    /// Every checked location is recorded in the config cache so a later
    /// creation of that config reaches this file. The walk stops at the
    /// first existing config, at a `node_modules` directory, or after the
    /// client's project root.
    fn find_config_for_open_file(&mut self, path: &CanonicalPath) -> Option<NormalizedPath> {
        let host = Arc::clone(&self.host);
        let file = self.registry.get(path)?.file_name().clone();
        if file.is_dynamic() {
            return None;
        }
        let project_root = self.open_files.get(path).cloned().flatten();
        let project_root_key = project_root.as_ref().map(|root| self.canonical(root));
        let config_names = self.config.config_file_names.clone();
        for directory in file.ancestors() {
            if directory.file_name() == "node_modules" {
                break;
            }
            for name in &config_names {
                let config_file = directory.join(name);
                let key = self.canonical(&config_file);
                if self
                    .config_files
                    .add_open_file(&*host, &mut self.watches, &key, &config_file, path)
                {
                    return Some(config_file);
                }
            }
            if project_root_key.as_ref() == Some(&self.canonical(&directory)) {
                break;
            }
        }
        None
    }

    pub(crate) fn assign_project_to_opened_file(&mut self, path: &CanonicalPath) -> Result<OpenFileResult> {
        self.pending_config_rediscovery.shift_remove(path);
        let info = self
            .registry
            .get(path)
            .ok_or_else(|| ProjectServiceError::Internal(format!("no script info for open file {}", path)))?;
        let file = info.file_name().clone();
        let in_external_project = info
            .containing_projects()
            .iter()
            .any(|id| self.kind_of(*id) == Some(ProjectKind::External));

        let mut result = OpenFileResult::default();
        if !in_external_project {
            if let Some(config_file) = self.find_config_for_open_file(path) {
                let id = match self.configured_project(&config_file) {
                    Some(id) => id,
                    None => {
                        let reason = format!("Creating possible configured project for {} to open", file);
                        self.create_and_load_configured_project(&config_file, reason)?
                    }
                };
                self.update_project_logged(id);

                let mut default_project = Some(id).filter(|id| {
                    self.projects
                        .get(id)
                        .is_some_and(|project| project.contains_file(path))
                });
                if default_project.is_none() {
                    default_project = self.find_project_in_references(id, path);
                }
                if let Some(info) = self.registry.get_mut(path) {
                    info.set_default_configured_project(default_project);
                }

                let errors = self
                    .projects
                    .get(&id)
                    .map(|project| project.config_errors().to_vec())
                    .unwrap_or_default();
                self.emit(ProjectServiceEvent::ConfigFileDiag {
                    trigger_file: file.clone(),
                    config_file: config_file.clone(),
                    diagnostics: errors.clone(),
                });
                result.configured_project = Some(config_file);
                result.config_file_errors = errors;
            }
        }

        let orphan = self
            .registry
            .get(path)
            .is_some_and(|info| info.is_orphan(|id| self.is_background(id)));
        if orphan {
            self.assign_orphan_to_inferred(path)?;
        } else {
            self.remove_from_inferred_if_owned_elsewhere(path);
        }
        Ok(result)
    }

    /// Apply edits given in 1-based positions. All positions refer to the
    /// text before the batch; edits are applied last to first.
    pub fn change_open_file(&mut self, file: &NormalizedPath, edits: &[TextEdit]) -> Result<()> {
        let path = self.canonical(file);
        let info = self
            .registry
            .get_mut(&path)
            .ok_or_else(|| ProjectServiceError::ScriptInfoNotFound(file.clone()))?;
        if !info.is_open() {
            return Err(ProjectServiceError::FileNotOpen(file.clone()));
        }
        for edit in edits.iter().rev() {
            let start = info.line_offset_to_position(edit.start.line, edit.start.offset);
            let end = info.line_offset_to_position(edit.end.line, edit.end.offset);
            info.edit_content(start, end.max(start), &edit.new_text);
        }
        let containing = info.containing_projects().to_vec();
        for id in containing {
            if let Some(project) = self.projects.get_mut(&id) {
                project.mark_as_dirty();
            }
        }
        Ok(())
    }

    /// Close `file`. Its inferred projects lose it as a root, and projects
    /// and script infos left without purpose are released.
    pub fn close_client_file(&mut self, file: &NormalizedPath) -> Result<()> {
        let path = self.canonical(file);
        if !self.open_files.contains_key(&path) {
            return Err(ProjectServiceError::FileNotOpen(file.clone()));
        }
        self.close_open_script_info(&path);
        self.cleanup_projects_and_script_infos();
        self.schedule_gc();
        Ok(())
    }

    fn close_open_script_info(&mut self, path: &CanonicalPath) {
        let host = Arc::clone(&self.host);
        self.open_files.shift_remove(path);
        self.pending_config_rediscovery.shift_remove(path);
        self.config_files
            .remove_open_file(&*host, &mut self.watches, path);

        let Some(info) = self.registry.get_mut(path) else {
            return;
        };
        let outcome = info.close(&*host, self.config.max_file_size);
        log::info!("Closed {}", info.file_name());
        let containing = info.containing_projects().to_vec();
        if !info.is_dynamic() && info.file_watcher().is_none() {
            let watcher = self
                .watches
                .watch_file(&*host, info.file_name(), WatchRoute::ScriptInfo(path.clone()));
            info.set_file_watcher(Some(watcher));
        }

        for id in containing {
            let Some(project) = self.projects.get_mut(&id) else {
                continue;
            };
            if project.kind() == ProjectKind::Inferred {
                project.remove_root(path);
            }
            if outcome.changed {
                project.mark_as_dirty();
            }
        }
    }

    /// Open, edit and close several files, then assign projects once.
    pub fn apply_changes_in_open_files(
        &mut self,
        opens: Vec<OpenFileRequest>,
        changes: Vec<(NormalizedPath, Vec<TextEdit>)>,
        closes: Vec<NormalizedPath>,
    ) -> Result<()> {
        let opened: Vec<CanonicalPath> = opens
            .into_iter()
            .map(|open| self.open_script_info(&open.file, open.content, open.kind, open.project_root))
            .collect();
        for (file, edits) in &changes {
            self.change_open_file(file, edits)?;
        }
        for file in &closes {
            let path = self.canonical(file);
            if self.open_files.contains_key(&path) {
                self.close_open_script_info(&path);
            } else {
                log::trace!("Ignoring close of {} which is not open", file);
            }
        }
        for path in &opened {
            if self.open_files.contains_key(path) {
                self.assign_project_to_opened_file(path)?;
            }
        }
        if !closes.is_empty() {
            // Closed roots may have emptied inferred projects.
            let inferred = self.inferred_projects.clone();
            for id in inferred {
                self.update_project_logged(id);
            }
        }
        self.cleanup_projects_and_script_infos();
        self.schedule_gc();
        Ok(())
    }

    /// Reconcile every open file with the current project structure.
    ///
    /// Files whose config candidates changed go through discovery again;
    /// orphans join inferred projects; files a real project picked up leave
    /// their inferred projects. Inferred projects are brought current and
    /// projects left without purpose are closed.
    pub fn ensure_project_for_open_files(&mut self) {
        log::info!("Ensuring projects for {} open files", self.open_files.len());
        let open: Vec<CanonicalPath> = self.open_files.keys().cloned().collect();
        for path in &open {
            let result = if self.pending_config_rediscovery.contains(path) {
                self.assign_project_to_opened_file(path).map(|_| ())
            } else if self
                .registry
                .get(path)
                .is_some_and(|info| info.is_orphan(|id| self.is_background(id)))
            {
                self.assign_orphan_to_inferred(path).map(|_| ())
            } else {
                self.remove_from_inferred_if_owned_elsewhere(path);
                Ok(())
            };
            if let Err(e) = result {
                log::error!("Failed to assign a project to {}: {}", path, e);
            }
        }

        let inferred: Vec<ProjectId> = self.inferred_projects.clone();
        for id in inferred {
            self.update_project_logged(id);
        }
        self.cleanup_projects_and_script_infos();
    }
}
