//
// service/background.rs
//
// Auto-import provider and auxiliary projects
//

use std::sync::Arc;

use super::ProjectService;
use crate::config_file::CompilerOptions;
use crate::error::{ProjectServiceError, Result};
use crate::path::NormalizedPath;
use crate::project::{auto_import_root_files, Project, ProjectId, ProjectVariant, UpdateContext};

impl ProjectService {
    /// Directory whose `package.json` files feed a project's auto imports.
    fn package_json_directory(&self, project: &Project) -> Option<NormalizedPath> {
        match project.variant() {
            ProjectVariant::Configured(state) => state.config_file.parent(),
            ProjectVariant::Inferred(state) => Some(
                state
                    .project_root
                    .clone()
                    .unwrap_or_else(|| state.current_directory.clone()),
            ),
            _ => None,
        }
    }

    /// Bring the auto-import provider of `host_id` in line with the host's
    /// dependencies, creating or closing it as needed.
    pub(crate) fn refresh_auto_import_provider(&mut self, host_id: ProjectId) {
        if !self.config.include_package_json_auto_imports {
            return;
        }
        let host = Arc::clone(&self.host);
        let Some(project) = self.projects.get(&host_id) else {
            return;
        };
        let existing = project.auto_import_provider();
        let roots = match self.package_json_directory(project) {
            Some(directory) if project.language_service_enabled() => {
                auto_import_root_files(&*host, &directory, project.program_files(), self.case_sensitive)
            }
            _ => Vec::new(),
        };

        if roots.is_empty() {
            if let Some(provider) = existing {
                log::trace!("Closing auto-import provider of {}", host_id);
                self.close_project(provider);
            }
            return;
        }

        let provider = match existing.filter(|id| self.projects.contains_key(id)) {
            Some(provider) => provider,
            None => {
                self.names.auto_import += 1;
                let name = format!("/dev/null/autoImportProviderProject{}*", self.names.auto_import);
                let provider = self.insert_project(
                    name,
                    ProjectVariant::AutoImportProvider { host_project: host_id },
                    CompilerOptions::background_defaults(),
                );
                if let Some(project) = self.projects.get_mut(&host_id) {
                    project.set_auto_import_provider(Some(provider));
                }
                provider
            }
        };
        if let Some(project) = self.projects.get_mut(&provider) {
            project.set_root_files(roots, self.case_sensitive);
        }
        if let Err(e) = self.update_background_project(provider) {
            log::error!("Failed to update auto-import provider {}: {}", provider, e);
        }
    }

    /// Create a project that resolves `roots` on behalf of `host_id`, for
    /// example to reach the sources behind declaration files.
    pub fn create_auxiliary_project(&mut self, host_id: ProjectId, roots: Vec<NormalizedPath>) -> Result<ProjectId> {
        if !self.projects.contains_key(&host_id) {
            return Err(ProjectServiceError::ProjectNotFound(host_id));
        }
        self.names.auxiliary += 1;
        let name = format!("/dev/null/auxiliaryProject{}*", self.names.auxiliary);
        let id = self.insert_project(
            name,
            ProjectVariant::Auxiliary { host_project: host_id },
            CompilerOptions::background_defaults(),
        );
        if let Some(project) = self.projects.get_mut(&id) {
            project.set_root_files(roots, self.case_sensitive);
        }
        self.update_background_project(id)?;
        Ok(id)
    }

    /// Background projects skip the default library and never get
    /// providers of their own.
    fn update_background_project(&mut self, id: ProjectId) -> Result<()> {
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
            default_library: None,
        };
        project.update_graph(&mut ctx)?;
        Ok(())
    }
}
