//
// project/kind.rs
//
// Kind tag and kind-specific state of a project
//

use indexmap::IndexMap;
use serde::Serialize;

use super::ProjectId;
use crate::config_file::{ConfigFileSpecs, ProjectReference, ReloadLevel};
use crate::host::WatchId;
use crate::path::{CanonicalPath, NormalizedPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectKind {
    Inferred,
    Configured,
    External,
    AutoImportProvider,
    Auxiliary,
}

impl ProjectKind {
    /// Background projects support other projects and are never the
    /// default project of a file.
    pub fn is_background(self) -> bool {
        matches!(self, ProjectKind::AutoImportProvider | ProjectKind::Auxiliary)
    }
}

#[derive(Debug, Clone)]
pub struct InferredState {
    /// Explicit root path the client asked to group files under.
    pub project_root: Option<NormalizedPath>,
    /// Directory the project was created for.
    pub current_directory: NormalizedPath,
    /// Created under the single-inferred-project policy.
    pub is_shared: bool,
}

#[derive(Debug, Clone)]
pub struct ConfiguredState {
    pub config_file: NormalizedPath,
    pub config_key: CanonicalPath,
    pub pending_reload: ReloadLevel,
    pub project_references: Vec<ProjectReference>,
    /// Include specs of the last parse, used to filter wildcard events.
    pub specs: Option<ConfigFileSpecs>,
    /// Watched include directories and their watchers.
    pub wildcard_watchers: IndexMap<NormalizedPath, (bool, WatchId)>,
    /// Configs pulled in through `extends`.
    pub extended_configs: Vec<CanonicalPath>,
    /// Number of external projects that listed this config file.
    pub external_project_refs: usize,
    /// Created from an external project and not loaded yet.
    pub initial_load_pending: bool,
}

impl ConfiguredState {
    pub fn new(config_file: NormalizedPath, config_key: CanonicalPath) -> Self {
        Self {
            config_file,
            config_key,
            pending_reload: ReloadLevel::Full,
            project_references: Vec::new(),
            specs: None,
            wildcard_watchers: IndexMap::new(),
            extended_configs: Vec::new(),
            external_project_refs: 0,
            initial_load_pending: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExternalState {
    pub external_name: String,
}

/// Kind-specific state. Shared behavior lives on [`super::Project`].
#[derive(Debug, Clone)]
pub enum ProjectVariant {
    Inferred(InferredState),
    Configured(ConfiguredState),
    External(ExternalState),
    AutoImportProvider { host_project: ProjectId },
    Auxiliary { host_project: ProjectId },
}

impl ProjectVariant {
    pub fn kind(&self) -> ProjectKind {
        match self {
            ProjectVariant::Inferred(_) => ProjectKind::Inferred,
            ProjectVariant::Configured(_) => ProjectKind::Configured,
            ProjectVariant::External(_) => ProjectKind::External,
            ProjectVariant::AutoImportProvider { .. } => ProjectKind::AutoImportProvider,
            ProjectVariant::Auxiliary { .. } => ProjectKind::Auxiliary,
        }
    }

    /// The project a background project serves.
    pub fn host_project(&self) -> Option<ProjectId> {
        match self {
            ProjectVariant::AutoImportProvider { host_project } | ProjectVariant::Auxiliary { host_project } => {
                Some(*host_project)
            }
            _ => None,
        }
    }
}
