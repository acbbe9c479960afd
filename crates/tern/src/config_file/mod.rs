//
// config_file/mod.rs
//
// Config file discovery support: options, parsing, wildcard expansion and
// the existence cache
//

mod existence;
mod options;
mod parse;
mod wildcard;

pub use existence::{ConfigFileExistenceInfo, ConfigFileRegistry};
pub use options::{CompilerOptions, PluginImport, TypeAcquisition, WatchOptions};
pub use parse::{
    codes, parse_config_file, refresh_file_names, strip_json_comments, ConfigDiagnostic, ParsedConfig,
    ProjectReference,
};
pub use wildcard::{
    expand_file_names, supported_extensions, wildcard_directories, ConfigFileSpecs, WildcardMatcher,
    DEFAULT_EXCLUDES,
};

/// How much of a configured project must be recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReloadLevel {
    #[default]
    None,
    /// Re-expand the file list from the stored specs.
    Partial,
    /// Re-read and re-parse the config file.
    Full,
}
