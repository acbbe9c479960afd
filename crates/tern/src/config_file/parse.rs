//
// config_file/parse.rs
//
// tsconfig/jsconfig parsing into a ParsedConfig
//

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::options::{CompilerOptions, TypeAcquisition, WatchOptions};
use super::wildcard::{expand_file_names, wildcard_directories, ConfigFileSpecs, WildcardMatcher};
use crate::host::ServerHost;
use crate::path::NormalizedPath;

/// Diagnostic codes reported for config files.
pub mod codes {
    pub const CANNOT_READ_FILE: u32 = 5083;
    pub const FAILED_TO_PARSE: u32 = 5014;
    pub const INVALID_OPTION_VALUE: u32 = 5024;
    pub const FILE_NOT_FOUND: u32 = 6053;
    pub const CIRCULAR_EXTENDS: u32 = 18000;
    pub const EMPTY_FILES_LIST: u32 = 18002;
    pub const NO_INPUTS_FOUND: u32 = 18003;
}

/// An error found while reading or interpreting a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDiagnostic {
    pub file: Option<NormalizedPath>,
    pub code: u32,
    pub message: String,
}

impl ConfigDiagnostic {
    fn new(file: &NormalizedPath, code: u32, message: String) -> Self {
        Self {
            file: Some(file.clone()),
            code,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectReference {
    /// Path of the referenced config file.
    pub path: NormalizedPath,
    pub prepend: bool,
}

/// Everything the project system needs from one config file.
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    pub config_file: NormalizedPath,
    pub file_names: Vec<NormalizedPath>,
    pub options: CompilerOptions,
    pub project_references: Vec<ProjectReference>,
    pub watch_options: Option<WatchOptions>,
    pub type_acquisition: TypeAcquisition,
    pub wildcard_directories: IndexMap<NormalizedPath, bool>,
    pub specs: ConfigFileSpecs,
    /// Configs pulled in through `extends`, nearest first.
    pub extended_config_files: Vec<NormalizedPath>,
    pub errors: Vec<ConfigDiagnostic>,
}

impl ParsedConfig {
    pub fn is_jsconfig(&self) -> bool {
        self.config_file.file_name().eq_ignore_ascii_case("jsconfig.json")
    }
}

/// The raw pieces of one config file after `extends` has been applied.
struct RawConfig {
    options: CompilerOptions,
    files: Option<Vec<String>>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    references: Vec<ProjectReference>,
    watch_options: Option<WatchOptions>,
    type_acquisition: Option<TypeAcquisition>,
}

/// Read and parse `config_file`, expanding its file list.
///
/// Never fails: unreadable or malformed configs produce a `ParsedConfig`
/// with no files and the problem recorded in `errors`.
pub fn parse_config_file(
    host: &dyn ServerHost,
    config_file: &NormalizedPath,
    case_sensitive: bool,
) -> ParsedConfig {
    let base_dir = config_file
        .parent()
        .unwrap_or_else(|| NormalizedPath::from_absolute("/"));
    let is_jsconfig = config_file.file_name().eq_ignore_ascii_case("jsconfig.json");

    let mut errors = Vec::new();
    let mut extended = Vec::new();
    let mut chain = vec![config_file.clone()];
    let raw = read_raw_config(host, config_file, &mut chain, &mut extended, &mut errors);

    let mut options = if is_jsconfig {
        CompilerOptions::jsconfig_defaults()
    } else {
        CompilerOptions::default()
    };
    let specs;
    let mut project_references = Vec::new();
    let mut watch_options = None;
    let mut type_acquisition = TypeAcquisition::default_for(is_jsconfig);
    match raw {
        Some(raw) => {
            options.merge(&raw.options);
            specs = ConfigFileSpecs {
                files: raw.files,
                include: raw.include,
                exclude: raw.exclude,
                base_dir,
            };
            project_references = raw.references;
            watch_options = raw.watch_options;
            if let Some(acquisition) = raw.type_acquisition {
                type_acquisition = acquisition;
            }
        }
        None => {
            specs = ConfigFileSpecs {
                files: Some(Vec::new()),
                include: None,
                exclude: None,
                base_dir,
            };
        }
    }

    let mut parsed = ParsedConfig {
        config_file: config_file.clone(),
        file_names: Vec::new(),
        options,
        project_references,
        watch_options,
        type_acquisition,
        wildcard_directories: IndexMap::new(),
        specs,
        extended_config_files: extended,
        errors,
    };
    // A config that could not be read has nothing to expand.
    if parsed.errors.iter().any(|e| {
        e.file.as_ref() == Some(config_file)
            && matches!(e.code, codes::CANNOT_READ_FILE | codes::FAILED_TO_PARSE)
    }) {
        return parsed;
    }
    parsed.wildcard_directories = wildcard_directories(&parsed.specs);
    refresh_file_names(host, &mut parsed, case_sensitive);
    parsed
}

/// Recompute `file_names` from the stored specs (a partial reload).
pub fn refresh_file_names(host: &dyn ServerHost, parsed: &mut ParsedConfig, case_sensitive: bool) {
    let missing_root_messages: Vec<String> = parsed
        .specs
        .files
        .iter()
        .flatten()
        .map(|file| missing_file_message(&parsed.specs.base_dir.join(file)))
        .collect();
    parsed.errors.retain(|e| {
        !matches!(e.code, codes::NO_INPUTS_FOUND | codes::EMPTY_FILES_LIST)
            && !(e.code == codes::FILE_NOT_FOUND && missing_root_messages.contains(&e.message))
    });

    let matcher = match WildcardMatcher::new(&parsed.specs, &parsed.options, case_sensitive) {
        Ok(matcher) => matcher,
        Err(message) => {
            parsed.errors.push(ConfigDiagnostic::new(
                &parsed.config_file,
                codes::FAILED_TO_PARSE,
                message,
            ));
            parsed.file_names.clear();
            return;
        }
    };
    parsed.file_names = expand_file_names(host, &parsed.specs, &parsed.options, &matcher);

    for file in parsed.specs.files.iter().flatten() {
        let path = parsed.specs.base_dir.join(file);
        if !host.file_exists(&path) {
            parsed.errors.push(ConfigDiagnostic::new(
                &parsed.config_file,
                codes::FILE_NOT_FOUND,
                missing_file_message(&path),
            ));
        }
    }

    if parsed.file_names.is_empty() && parsed.project_references.is_empty() {
        let error = match (&parsed.specs.files, &parsed.specs.include) {
            (Some(files), None) if files.is_empty() => ConfigDiagnostic::new(
                &parsed.config_file,
                codes::EMPTY_FILES_LIST,
                format!(
                    "The 'files' list in config file '{}' is empty.",
                    parsed.config_file
                ),
            ),
            _ => ConfigDiagnostic::new(
                &parsed.config_file,
                codes::NO_INPUTS_FOUND,
                format!(
                    "No inputs were found in config file '{}'. Specified 'include' paths were '{}' and 'exclude' paths were '{}'.",
                    parsed.config_file,
                    serde_json::to_string(&parsed.specs.effective_include()).unwrap_or_default(),
                    serde_json::to_string(&parsed.specs.effective_exclude(&parsed.options)).unwrap_or_default(),
                ),
            ),
        };
        parsed.errors.push(error);
    }
}

fn read_raw_config(
    host: &dyn ServerHost,
    config_file: &NormalizedPath,
    chain: &mut Vec<NormalizedPath>,
    extended: &mut Vec<NormalizedPath>,
    errors: &mut Vec<ConfigDiagnostic>,
) -> Option<RawConfig> {
    let text = match host.read_file(config_file) {
        Ok(text) => text,
        Err(e) => {
            errors.push(ConfigDiagnostic::new(
                config_file,
                codes::CANNOT_READ_FILE,
                format!("Cannot read file '{}': {}.", config_file, e),
            ));
            return None;
        }
    };
    let json: Value = match serde_json::from_str(&strip_json_comments(&text)) {
        Ok(json @ Value::Object(_)) => json,
        Ok(_) => {
            errors.push(ConfigDiagnostic::new(
                config_file,
                codes::FAILED_TO_PARSE,
                format!("Failed to parse file '{}': expected an object.", config_file),
            ));
            return None;
        }
        Err(e) => {
            errors.push(ConfigDiagnostic::new(
                config_file,
                codes::FAILED_TO_PARSE,
                format!("Failed to parse file '{}': {}.", config_file, e),
            ));
            return None;
        }
    };

    let dir = config_file
        .parent()
        .unwrap_or_else(|| NormalizedPath::from_absolute("/"));

    // Start from the extended configs, with their specs made absolute.
    let mut raw = RawConfig {
        options: CompilerOptions::default(),
        files: None,
        include: None,
        exclude: None,
        references: Vec::new(),
        watch_options: None,
        type_acquisition: None,
    };
    for base in extends_list(&json) {
        let Some(base_path) = resolve_extends(host, &dir, &base) else {
            errors.push(ConfigDiagnostic::new(
                config_file,
                codes::FILE_NOT_FOUND,
                missing_file_message(&dir.join(&base)),
            ));
            continue;
        };
        if chain.contains(&base_path) {
            let cycle: Vec<&str> = chain.iter().map(|p| p.as_str()).collect();
            errors.push(ConfigDiagnostic::new(
                config_file,
                codes::CIRCULAR_EXTENDS,
                format!(
                    "Circularity detected while resolving configuration: {} -> {}",
                    cycle.join(" -> "),
                    base_path
                ),
            ));
            continue;
        }
        extended.push(base_path.clone());
        chain.push(base_path.clone());
        let inherited = read_raw_config(host, &base_path, chain, extended, errors);
        chain.pop();
        if let Some(inherited) = inherited {
            let base_dir = base_path
                .parent()
                .unwrap_or_else(|| NormalizedPath::from_absolute("/"));
            raw.options.merge(&absolutize_options(inherited.options, &base_dir));
            raw.files = absolutize(inherited.files, &base_dir).or(raw.files);
            raw.include = absolutize(inherited.include, &base_dir).or(raw.include);
            raw.exclude = absolutize(inherited.exclude, &base_dir).or(raw.exclude);
            raw.watch_options = inherited.watch_options.or(raw.watch_options);
        }
    }

    if let Some(value) = json.get("compilerOptions") {
        let (options, option_errors) = CompilerOptions::from_json(value);
        for message in option_errors {
            errors.push(ConfigDiagnostic::new(config_file, codes::INVALID_OPTION_VALUE, message));
        }
        raw.options.merge(&options);
    }
    if let Some(files) = string_list(&json, "files", config_file, errors) {
        raw.files = Some(files);
    }
    if let Some(include) = string_list(&json, "include", config_file, errors) {
        raw.include = Some(include);
    }
    if let Some(exclude) = string_list(&json, "exclude", config_file, errors) {
        raw.exclude = Some(exclude);
    }
    if let Some(references) = json.get("references").and_then(Value::as_array) {
        raw.references = references
            .iter()
            .filter_map(|r| {
                let path = r.get("path")?.as_str()?;
                let prepend = r.get("prepend").and_then(Value::as_bool).unwrap_or(false);
                Some(ProjectReference {
                    path: resolve_reference_path(host, &dir, path),
                    prepend,
                })
            })
            .collect();
    }
    if let Some(value) = json.get("watchOptions") {
        match serde_json::from_value::<WatchOptions>(value.clone()) {
            Ok(watch_options) => raw.watch_options = Some(watch_options),
            Err(e) => errors.push(ConfigDiagnostic::new(
                config_file,
                codes::INVALID_OPTION_VALUE,
                format!("Invalid 'watchOptions': {}", e),
            )),
        }
    }
    if let Some(value) = json.get("typeAcquisition") {
        match serde_json::from_value::<TypeAcquisition>(value.clone()) {
            Ok(acquisition) => raw.type_acquisition = Some(acquisition),
            Err(e) => errors.push(ConfigDiagnostic::new(
                config_file,
                codes::INVALID_OPTION_VALUE,
                format!("Invalid 'typeAcquisition': {}", e),
            )),
        }
    }
    Some(raw)
}

fn missing_file_message(path: &NormalizedPath) -> String {
    format!("File '{}' not found.", path)
}

fn extends_list(json: &Value) -> Vec<String> {
    match json.get("extends") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Locate an `extends` target: a path relative to the config, or a package
/// config under `node_modules`.
fn resolve_extends(host: &dyn ServerHost, dir: &NormalizedPath, spec: &str) -> Option<NormalizedPath> {
    let is_path = spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/') || spec.contains(':');
    if is_path {
        let path = dir.join(spec);
        if host.file_exists(&path) {
            return Some(path);
        }
        if !spec.ends_with(".json") {
            let with_ext = dir.join(&format!("{}.json", spec));
            if host.file_exists(&with_ext) {
                return Some(with_ext);
            }
        }
        return None;
    }
    std::iter::once(dir.clone())
        .chain(dir.ancestors())
        .find_map(|ancestor| {
            let base = ancestor.join("node_modules").join(spec);
            let candidates = if spec.ends_with(".json") {
                vec![base]
            } else {
                vec![base.join("tsconfig.json"), NormalizedPath::from_absolute(&format!("{}.json", base))]
            };
            candidates.into_iter().find(|c| host.file_exists(c))
        })
}

/// A reference may name a directory (meaning its tsconfig.json) or a file.
fn resolve_reference_path(host: &dyn ServerHost, dir: &NormalizedPath, path: &str) -> NormalizedPath {
    let target = dir.join(path);
    if target.has_extension(".json") || (host.file_exists(&target) && !host.directory_exists(&target)) {
        target
    } else {
        target.join("tsconfig.json")
    }
}

fn string_list(
    json: &Value,
    key: &str,
    config_file: &NormalizedPath,
    errors: &mut Vec<ConfigDiagnostic>,
) -> Option<Vec<String>> {
    let value = json.get(key)?;
    match value.as_array() {
        Some(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        None => {
            errors.push(ConfigDiagnostic::new(
                config_file,
                codes::INVALID_OPTION_VALUE,
                format!("Compiler option '{}' requires a value of type Array.", key),
            ));
            None
        }
    }
}

fn absolutize(specs: Option<Vec<String>>, base_dir: &NormalizedPath) -> Option<Vec<String>> {
    specs.map(|specs| {
        specs
            .iter()
            .map(|spec| base_dir.join(spec).as_str().to_string())
            .collect()
    })
}

fn absolutize_options(mut options: CompilerOptions, base_dir: &NormalizedPath) -> CompilerOptions {
    if let Some(out_dir) = options.out_dir.take() {
        options.out_dir = Some(base_dir.join(&out_dir).as_str().to_string());
    }
    options
}

/// Remove `//` and `/* */` comments and trailing commas, leaving string
/// literals intact.
pub fn strip_json_comments(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut in_string = false;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            ',' => {
                let mut j = i + 1;
                loop {
                    while j < chars.len() && chars[j].is_whitespace() {
                        j += 1;
                    }
                    // Skip comments between the comma and the closing bracket.
                    if chars.get(j) == Some(&'/') && chars.get(j + 1) == Some(&'/') {
                        while j < chars.len() && chars[j] != '\n' {
                            j += 1;
                        }
                        continue;
                    }
                    if chars.get(j) == Some(&'/') && chars.get(j + 1) == Some(&'*') {
                        j += 2;
                        while j < chars.len() && !(chars[j] == '*' && chars.get(j + 1) == Some(&'/')) {
                            j += 1;
                        }
                        j += 2;
                        continue;
                    }
                    break;
                }
                if !matches!(chars.get(j), Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
