//
// service/inferred.rs
//
// Inferred project selection and inferred compiler options
//

use super::ProjectService;
use crate::config_file::CompilerOptions;
use crate::error::{ProjectServiceError, Result};
use crate::path::{CanonicalPath, NormalizedPath};
use crate::project::{InferredState, Project, ProjectId, ProjectKind, ProjectVariant};

impl ProjectService {
    /// Compiler options for an inferred project rooted at `project_root`.
    fn inferred_options_for(&self, project_root: Option<&NormalizedPath>) -> CompilerOptions {
        project_root
            .and_then(|root| self.inferred_options_per_root.get(&self.canonical(root)))
            .unwrap_or(&self.inferred_options)
            .clone()
    }

    fn create_inferred_project(
        &mut self,
        project_root: Option<NormalizedPath>,
        current_directory: NormalizedPath,
        is_shared: bool,
    ) -> ProjectId {
        self.names.inferred += 1;
        let name = format!("/dev/null/inferredProject{}*", self.names.inferred);
        let options = self.inferred_options_for(project_root.as_ref());
        let id = self.insert_project(
            name,
            ProjectVariant::Inferred(InferredState {
                project_root,
                current_directory,
                is_shared,
            }),
            options,
        );
        self.inferred_projects.push(id);
        if let Some(project) = self.projects.get(&id) {
            self.plugins.project_created(project);
        }
        id
    }

    fn find_inferred(&self, pred: impl Fn(&InferredState) -> bool) -> Option<ProjectId> {
        self.inferred_projects.iter().copied().find(|id| {
            self.projects
                .get(id)
                .and_then(Project::as_inferred)
                .is_some_and(&pred)
        })
    }

    /// Pick the inferred project an orphan file joins: the one for its
    /// project root, else the shared one, else the one for its directory.
    fn inferred_project_for(&mut self, file: &NormalizedPath, project_root: Option<&NormalizedPath>) -> ProjectId {
        if self.config.use_inferred_project_per_project_root {
            if let Some(root) = project_root {
                let key = self.canonical(root);
                let case_sensitive = self.case_sensitive;
                let existing = self.find_inferred(|state| {
                    state
                        .project_root
                        .as_ref()
                        .is_some_and(|r| r.to_canonical(case_sensitive) == key)
                });
                return match existing {
                    Some(id) => id,
                    None => self.create_inferred_project(Some(root.clone()), root.clone(), false),
                };
            }
        }

        if self.config.use_single_inferred_project {
            return match self.find_inferred(|state| state.is_shared) {
                Some(id) => id,
                None => {
                    let current_directory = self.current_directory.clone();
                    self.create_inferred_project(None, current_directory, true)
                }
            };
        }

        let current_directory = if file.is_dynamic() {
            project_root
                .cloned()
                .unwrap_or_else(|| self.current_directory.clone())
        } else {
            file.parent().unwrap_or_else(|| self.current_directory.clone())
        };
        match self.find_inferred(|state| {
            state.project_root.is_none() && !state.is_shared && state.current_directory == current_directory
        }) {
            Some(id) => id,
            None => self.create_inferred_project(None, current_directory, false),
        }
    }

    /// Make an open file that no project contains a root of an inferred
    /// project, and bring that project current.
    pub(crate) fn assign_orphan_to_inferred(&mut self, path: &CanonicalPath) -> Result<ProjectId> {
        let file = self
            .registry
            .get(path)
            .map(|info| info.file_name().clone())
            .ok_or_else(|| ProjectServiceError::Internal(format!("no script info for open file {}", path)))?;
        let project_root = self.open_files.get(path).cloned().flatten();
        let id = self.inferred_project_for(&file, project_root.as_ref());
        if let Some(project) = self.projects.get_mut(&id) {
            log::trace!("Adding {} to inferred project {}", file, project.name());
            project.add_root(path.clone(), file);
        }
        self.update_project_graph(id)?;
        Ok(id)
    }

    /// Drop `path` from inferred roots once a real project contains it.
    pub(crate) fn remove_from_inferred_if_owned_elsewhere(&mut self, path: &CanonicalPath) {
        let Some(info) = self.registry.get(path) else {
            return;
        };
        let owned_elsewhere = info
            .containing_projects()
            .iter()
            .any(|id| matches!(self.kind_of(*id), Some(ProjectKind::Configured | ProjectKind::External)));
        if !owned_elsewhere {
            return;
        }
        let inferred: Vec<ProjectId> = info
            .containing_projects()
            .iter()
            .copied()
            .filter(|id| self.kind_of(*id) == Some(ProjectKind::Inferred))
            .collect();
        for id in inferred {
            let removed = self
                .projects
                .get_mut(&id)
                .is_some_and(|project| project.remove_root(path));
            if removed {
                log::trace!("Removed {} from inferred project {}", path, id);
                self.update_project_logged(id);
            }
        }
    }

    /// Set the options of inferred projects, either for the projects of one
    /// project root or for all others. `options` overlay the defaults.
    pub fn set_compiler_options_for_inferred_projects(
        &mut self,
        options: &CompilerOptions,
        project_root: Option<&NormalizedPath>,
    ) {
        let mut merged = CompilerOptions::inferred_defaults();
        merged.merge(options);
        let root_key = project_root.map(|root| self.canonical(root));
        match &root_key {
            Some(key) => {
                self.inferred_options_per_root.insert(key.clone(), merged.clone());
            }
            None => self.inferred_options = merged.clone(),
        }

        let case_sensitive = self.case_sensitive;
        let targets: Vec<ProjectId> = self
            .inferred_projects
            .iter()
            .copied()
            .filter(|id| {
                let state_root = self
                    .projects
                    .get(id)
                    .and_then(Project::as_inferred)
                    .and_then(|state| state.project_root.as_ref())
                    .map(|root| root.to_canonical(case_sensitive));
                match (&root_key, state_root) {
                    (Some(key), Some(root)) => *key == root,
                    (Some(_), None) => false,
                    (None, Some(root)) => !self.inferred_options_per_root.contains_key(&root),
                    (None, None) => true,
                }
            })
            .collect();
        for id in targets {
            let plugins = self.plugins.enabled_for(&merged);
            if let Some(project) = self.projects.get_mut(&id) {
                if project.set_compiler_options(merged.clone()) {
                    log::info!("Updated compiler options of {}", project.name());
                }
                project.set_plugins(plugins);
            }
            self.delay_update_project_graph(id);
        }
    }
}
