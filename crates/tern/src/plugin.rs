//
// plugin.rs
//
// Project plugin lifecycle hooks
//
// Plugins are registered in-process. Loading them from modules on disk is the
// embedder's business; the service only decides which plugins a project
// enables and calls their hooks.
//

use indexmap::{IndexMap, IndexSet};

use crate::config_file::CompilerOptions;
use crate::path::NormalizedPath;
use crate::project::Project;

/// Hooks a plugin receives for every project that enables it.
pub trait ProjectPlugin: Send {
    /// Name matched against `compilerOptions.plugins[].name`.
    fn name(&self) -> &str;

    fn on_project_created(&mut self, _project: &Project) {}

    /// The project's config file was re-read.
    fn on_config_changed(&mut self, _project: &Project) {}

    fn on_project_closed(&mut self, _project_name: &str) {}

    /// Extra files to include in the project's program, such as generated
    /// declarations.
    fn external_files(&self, _project: &Project) -> Vec<NormalizedPath> {
        Vec::new()
    }
}

/// Plugins known to the service, plus the names enabled for every project.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: IndexMap<String, Box<dyn ProjectPlugin>>,
    global: Vec<String>,
}

impl PluginRegistry {
    pub fn new(global: Vec<String>) -> Self {
        Self {
            plugins: IndexMap::new(),
            global,
        }
    }

    /// Register a plugin, replacing one with the same name.
    pub fn register(&mut self, plugin: Box<dyn ProjectPlugin>) {
        let name = plugin.name().to_string();
        log::info!("Registered project plugin {}", name);
        self.plugins.insert(name, plugin);
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins a project with `options` runs: the ones its options request
    /// followed by the global ones. Unknown names are skipped.
    pub fn enabled_for(&self, options: &CompilerOptions) -> Vec<String> {
        let mut names: IndexSet<String> = IndexSet::new();
        for name in options.plugin_names().into_iter().chain(self.global.iter().cloned()) {
            if self.plugins.contains_key(&name) {
                names.insert(name);
            } else {
                log::warn!("Plugin {} is not registered", name);
            }
        }
        names.into_iter().collect()
    }

    pub fn project_created(&mut self, project: &Project) {
        for name in project.plugins() {
            if let Some(plugin) = self.plugins.get_mut(name) {
                plugin.on_project_created(project);
            }
        }
    }

    pub fn config_changed(&mut self, project: &Project) {
        for name in project.plugins() {
            if let Some(plugin) = self.plugins.get_mut(name) {
                plugin.on_config_changed(project);
            }
        }
    }

    pub fn project_closed(&mut self, project_name: &str, enabled: &[String]) {
        for name in enabled {
            if let Some(plugin) = self.plugins.get_mut(name) {
                plugin.on_project_closed(project_name);
            }
        }
    }

    /// Files every enabled plugin adds to `project`.
    pub fn external_files(&self, project: &Project) -> Vec<NormalizedPath> {
        let mut files: Vec<NormalizedPath> = Vec::new();
        for name in project.plugins() {
            if let Some(plugin) = self.plugins.get(name) {
                for file in plugin.external_files(project) {
                    if !files.contains(&file) {
                        files.push(file);
                    }
                }
            }
        }
        files
    }
}
