//
// config_file/options.rs
//
// Compiler, watch and type-acquisition options
//

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Compiler options the project system interprets. Everything else is kept
/// verbatim in `extra` and passed through to the language service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_js: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_js: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_synthetic_default_imports: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_non_ts_extensions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_node_module_js_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_lib: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_size_limit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<PluginImport>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginImport {
    pub name: String,
}

impl CompilerOptions {
    /// Defaults for projects without a config file.
    pub fn inferred_defaults() -> Self {
        Self {
            allow_js: Some(true),
            allow_synthetic_default_imports: Some(true),
            allow_non_ts_extensions: Some(true),
            max_node_module_js_depth: Some(2),
            jsx: Some("preserve".to_string()),
            ..Self::default()
        }
    }

    /// Options implied by a `jsconfig.json`.
    pub fn jsconfig_defaults() -> Self {
        Self {
            allow_js: Some(true),
            allow_synthetic_default_imports: Some(true),
            max_node_module_js_depth: Some(2),
            ..Self::default()
        }
    }

    /// Relaxed options for background projects.
    pub fn background_defaults() -> Self {
        Self {
            no_lib: Some(true),
            max_node_module_js_depth: Some(0),
            ..Self::default()
        }
    }

    pub fn allow_js(&self) -> bool {
        self.allow_js.unwrap_or(false)
    }

    pub fn no_lib(&self) -> bool {
        self.no_lib.unwrap_or(false)
    }

    pub fn max_node_module_js_depth(&self) -> u32 {
        self.max_node_module_js_depth.unwrap_or(0)
    }

    pub fn disable_size_limit(&self) -> bool {
        self.disable_size_limit.unwrap_or(false)
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .iter()
            .flatten()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Overlay `other` on top of `self`: options set in `other` win.
    pub fn merge(&mut self, other: &CompilerOptions) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field.clone();
                })*
            };
        }
        take!(
            allow_js,
            check_js,
            allow_synthetic_default_imports,
            allow_non_ts_extensions,
            max_node_module_js_depth,
            jsx,
            no_lib,
            out_dir,
            composite,
            disable_size_limit,
            types,
            plugins
        );
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Parse a `compilerOptions` object. Ill-typed fields are reported and
    /// skipped, the rest are kept.
    pub fn from_json(value: &Value) -> (Self, Vec<String>) {
        let Some(object) = value.as_object() else {
            return (
                Self::default(),
                vec!["'compilerOptions' should be an object".to_string()],
            );
        };
        let mut errors = Vec::new();
        let mut clean = Map::new();
        for (key, field) in object {
            let mut single = Map::new();
            single.insert(key.clone(), field.clone());
            match serde_json::from_value::<CompilerOptions>(Value::Object(single)) {
                Ok(_) => {
                    clean.insert(key.clone(), field.clone());
                }
                Err(e) => errors.push(format!("Invalid value for compiler option '{}': {}", key, e)),
            }
        }
        let options = serde_json::from_value(Value::Object(clean)).unwrap_or_default();
        (options, errors)
    }
}

/// File-watching preferences carried by a config file. The engine records
/// them and passes them to the host; it does not interpret them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_polling: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronous_watch_directory: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_directories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeAcquisition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_filename_based_type_acquisition: Option<bool>,
}

impl TypeAcquisition {
    /// Type acquisition is on by default only for JavaScript projects.
    pub fn default_for(is_jsconfig: bool) -> Self {
        Self {
            enable: Some(is_jsconfig),
            ..Self::default()
        }
    }
}
