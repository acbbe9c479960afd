//
// config.rs
//
// Settings of the project service
//

use std::time::Duration;

use crate::path::NormalizedPath;

/// Project service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectServiceConfig {
    /// Quiet period before a dirty project is rebuilt in the background
    pub project_update_debounce_ms: u64,
    /// Quiet period before open files are re-assigned to projects
    pub ensure_projects_delay_ms: u64,
    /// Idle period before unused caches are released
    pub gc_delay_ms: u64,
    /// Closed files above this size load as empty text
    pub max_file_size: u64,
    /// Non-TypeScript root size above which a project goes syntax-only
    pub max_non_ts_project_size: u64,
    /// Edit history kept per open file
    pub max_text_versions: usize,
    /// Put every orphan file in one shared inferred project
    pub use_single_inferred_project: bool,
    /// Group orphan files by the client-supplied project root
    pub use_inferred_project_per_project_root: bool,
    /// Build auto-import provider projects from package.json dependencies
    pub include_package_json_auto_imports: bool,
    /// Config file names searched for, in priority order
    pub config_file_names: Vec<String>,
    /// Library file added to every program unless `noLib` is set
    pub default_library: Option<NormalizedPath>,
    /// Plugins enabled for every project
    pub global_plugins: Vec<String>,
}

impl Default for ProjectServiceConfig {
    fn default() -> Self {
        Self {
            project_update_debounce_ms: 250,
            ensure_projects_delay_ms: 2500,
            gc_delay_ms: 7000,
            max_file_size: 4 * 1024 * 1024,
            max_non_ts_project_size: 20 * 1024 * 1024,
            max_text_versions: crate::text::DEFAULT_MAX_VERSIONS,
            use_single_inferred_project: false,
            use_inferred_project_per_project_root: true,
            include_package_json_auto_imports: false,
            config_file_names: vec!["tsconfig.json".to_string(), "jsconfig.json".to_string()],
            default_library: None,
            global_plugins: Vec::new(),
        }
    }
}

impl ProjectServiceConfig {
    pub fn project_update_debounce(&self) -> Duration {
        Duration::from_millis(self.project_update_debounce_ms)
    }

    pub fn ensure_projects_delay(&self) -> Duration {
        Duration::from_millis(self.ensure_projects_delay_ms)
    }

    pub fn gc_delay(&self) -> Duration {
        Duration::from_millis(self.gc_delay_ms)
    }

    pub fn log_summary(&self) {
        log::info!("Project service configuration:");
        log::info!("  project_update_debounce_ms: {}", self.project_update_debounce_ms);
        log::info!("  ensure_projects_delay_ms: {}", self.ensure_projects_delay_ms);
        log::info!("  gc_delay_ms: {}", self.gc_delay_ms);
        log::info!("  max_file_size: {}", self.max_file_size);
        log::info!("  max_non_ts_project_size: {}", self.max_non_ts_project_size);
        log::info!("  max_text_versions: {}", self.max_text_versions);
        log::info!("  use_single_inferred_project: {}", self.use_single_inferred_project);
        log::info!(
            "  use_inferred_project_per_project_root: {}",
            self.use_inferred_project_per_project_root
        );
        log::info!(
            "  include_package_json_auto_imports: {}",
            self.include_package_json_auto_imports
        );
        log::info!("  config_file_names: {:?}", self.config_file_names);
        log::info!(
            "  default_library: {}",
            self.default_library
                .as_ref()
                .map(|p| p.as_str())
                .unwrap_or("(none)")
        );
        log::info!("  global_plugins: {:?}", self.global_plugins);
    }
}

/// Build a configuration from a camelCase settings object.
///
/// Missing or ill-typed keys keep their defaults.
pub fn parse_service_config(settings: &serde_json::Value) -> ProjectServiceConfig {
    let mut config = ProjectServiceConfig::default();

    if let Some(v) = settings.get("projectUpdateDebounceMs").and_then(|v| v.as_u64()) {
        config.project_update_debounce_ms = v;
    }
    if let Some(v) = settings.get("ensureProjectsDelayMs").and_then(|v| v.as_u64()) {
        config.ensure_projects_delay_ms = v;
    }
    if let Some(v) = settings.get("gcDelayMs").and_then(|v| v.as_u64()) {
        config.gc_delay_ms = v;
    }
    if let Some(v) = settings.get("maxFileSize").and_then(|v| v.as_u64()) {
        config.max_file_size = v;
    }
    if let Some(v) = settings.get("maxNonTsProjectSize").and_then(|v| v.as_u64()) {
        config.max_non_ts_project_size = v;
    }
    if let Some(v) = settings.get("maxTextVersions").and_then(|v| v.as_u64()) {
        // A history shorter than two versions cannot describe a change.
        config.max_text_versions = (v as usize).max(2);
    }
    if let Some(v) = settings
        .get("useSingleInferredProject")
        .and_then(|v| v.as_bool())
    {
        config.use_single_inferred_project = v;
    }
    if let Some(v) = settings
        .get("useInferredProjectPerProjectRoot")
        .and_then(|v| v.as_bool())
    {
        config.use_inferred_project_per_project_root = v;
    }
    if let Some(v) = settings
        .get("includePackageJsonAutoImports")
        .and_then(|v| v.as_bool())
    {
        config.include_package_json_auto_imports = v;
    }
    if let Some(names) = settings.get("configFileNames").and_then(|v| v.as_array()) {
        let names: Vec<String> = names
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect();
        if !names.is_empty() {
            config.config_file_names = names;
        }
    }
    if let Some(v) = settings.get("defaultLibrary").and_then(|v| v.as_str()) {
        config.default_library = Some(NormalizedPath::from_absolute(v));
    }
    if let Some(plugins) = settings.get("globalPlugins").and_then(|v| v.as_array()) {
        config.global_plugins = plugins
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect();
    }

    config
}
