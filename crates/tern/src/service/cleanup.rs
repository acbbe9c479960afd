//
// service/cleanup.rs
//
// Closing projects and script infos nothing depends on
//

use std::collections::HashSet;
use std::sync::Arc;

use super::ProjectService;
use crate::path::CanonicalPath;
use crate::project::{Project, ProjectId, ProjectVariant};

impl ProjectService {
    /// Configured projects that must stay open: those containing an open
    /// file, those an open file's config discovery settled on, those an
    /// external project lists, and every project they reference.
    fn configured_projects_to_retain(&self) -> HashSet<ProjectId> {
        let mut stack: Vec<ProjectId> = Vec::new();
        for path in self.open_files.keys() {
            if let Some(info) = self.registry.get(path) {
                stack.extend(info.containing_projects().iter().copied());
            }
        }
        for (key, id) in &self.configured_projects {
            let discovered = self.config_files.get(key).is_some_and(|entry| {
                entry.exists()
                    && entry
                        .open_files_impacted()
                        .any(|path| self.open_files.contains_key(path))
            });
            let externally_referenced = self
                .projects
                .get(id)
                .and_then(Project::as_configured)
                .is_some_and(|state| state.external_project_refs > 0);
            if discovered || externally_referenced {
                stack.push(*id);
            }
        }

        let mut retained = HashSet::new();
        while let Some(id) = stack.pop() {
            let Some(state) = self.projects.get(&id).and_then(Project::as_configured) else {
                continue;
            };
            if !retained.insert(id) {
                continue;
            }
            for reference in &state.project_references {
                if let Some(referenced) = self.configured_projects.get(&self.canonical(&reference.path)) {
                    stack.push(*referenced);
                }
            }
        }
        retained
    }

    /// Close orphan projects, then drop closed script infos no project
    /// contains.
    pub(crate) fn cleanup_projects_and_script_infos(&mut self) {
        let retained = self.configured_projects_to_retain();
        let to_close: Vec<ProjectId> = self
            .projects
            .values()
            .filter(|project| match project.variant() {
                ProjectVariant::Configured(_) => !retained.contains(&project.id()),
                ProjectVariant::Inferred(_) => project.root_count() == 0,
                ProjectVariant::AutoImportProvider { host_project } | ProjectVariant::Auxiliary { host_project } => {
                    !self.projects.contains_key(host_project)
                }
                ProjectVariant::External(_) => false,
            })
            .map(Project::id)
            .collect();
        for id in to_close {
            log::info!("Removing orphan project {}", id);
            self.close_project(id);
        }

        let host = Arc::clone(&self.host);
        let orphans: Vec<CanonicalPath> = self
            .registry
            .iter()
            .filter(|(_, info)| !info.is_open() && info.containing_projects().is_empty())
            .map(|(path, _)| path.clone())
            .collect();
        for path in orphans {
            if let Some(info) = self.registry.remove(&path) {
                if let Some(watcher) = info.file_watcher() {
                    self.watches.close(&*host, watcher);
                }
            }
        }
    }
}
