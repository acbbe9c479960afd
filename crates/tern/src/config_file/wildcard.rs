//
// config_file/wildcard.rs
//
// Expansion of files/include/exclude specs into root file names
//

use std::collections::BTreeMap;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;

use super::options::CompilerOptions;
use crate::host::ServerHost;
use crate::path::NormalizedPath;

/// Directories excluded when a config gives no `exclude`.
pub const DEFAULT_EXCLUDES: &[&str] = &["node_modules", "bower_components", "jspm_packages"];

const TS_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".d.ts"];
const JS_EXTENSIONS: &[&str] = &[".js", ".jsx"];

/// The file-selection part of a config file, kept so the file list can be
/// recomputed without re-parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFileSpecs {
    pub files: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    /// Directory the specs are relative to.
    pub base_dir: NormalizedPath,
}

impl ConfigFileSpecs {
    /// Include specs after defaulting: `**/*` when neither `files` nor
    /// `include` is present.
    pub fn effective_include(&self) -> Vec<String> {
        match (&self.files, &self.include) {
            (_, Some(include)) => include.clone(),
            (None, None) => vec!["**/*".to_string()],
            (Some(_), None) => Vec::new(),
        }
    }

    pub fn effective_exclude(&self, options: &CompilerOptions) -> Vec<String> {
        match &self.exclude {
            Some(exclude) => exclude.clone(),
            None => {
                let mut exclude: Vec<String> =
                    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
                if let Some(out_dir) = &options.out_dir {
                    exclude.push(out_dir.clone());
                }
                exclude
            }
        }
    }
}

/// Compiled include/exclude matchers for one config.
pub struct WildcardMatcher {
    include: GlobSet,
    exclude: GlobSet,
    has_include: bool,
    extensions: Vec<&'static str>,
}

impl WildcardMatcher {
    pub fn new(
        specs: &ConfigFileSpecs,
        options: &CompilerOptions,
        case_sensitive: bool,
    ) -> Result<Self, String> {
        let include = specs.effective_include();
        let mut include_builder = GlobSetBuilder::new();
        for spec in &include {
            let pattern = absolute_pattern(&specs.base_dir, spec);
            let pattern = if is_directory_spec(spec) {
                format!("{}/**/*", pattern.trim_end_matches('/'))
            } else {
                pattern
            };
            include_builder.add(build_glob(&pattern, case_sensitive)?);
        }

        let mut exclude_builder = GlobSetBuilder::new();
        for spec in specs.effective_exclude(options) {
            let pattern = absolute_pattern(&specs.base_dir, &spec);
            exclude_builder.add(build_glob(&pattern, case_sensitive)?);
            exclude_builder.add(build_glob(
                &format!("{}/**", pattern.trim_end_matches('/')),
                case_sensitive,
            )?);
        }

        Ok(Self {
            include: include_builder
                .build()
                .map_err(|e| format!("Invalid include patterns: {}", e))?,
            exclude: exclude_builder
                .build()
                .map_err(|e| format!("Invalid exclude patterns: {}", e))?,
            has_include: !include.is_empty(),
            extensions: supported_extensions(options),
        })
    }

    pub fn is_excluded(&self, path: &NormalizedPath) -> bool {
        self.exclude.is_match(path.as_str())
    }

    /// True when a file at `path` would be picked up by the include specs.
    pub fn matches_file(&self, path: &NormalizedPath) -> bool {
        self.has_include
            && extension_of(path, &self.extensions).is_some()
            && !path.file_name().starts_with('.')
            && self.include.is_match(path.as_str())
            && !self.is_excluded(path)
    }
}

fn build_glob(pattern: &str, case_sensitive: bool) -> Result<globset::Glob, String> {
    let mut glob = GlobBuilder::new(pattern);
    glob.literal_separator(true);
    glob.case_insensitive(!case_sensitive);
    glob.build()
        .map_err(|e| format!("Invalid pattern '{}': {}", pattern, e))
}

fn absolute_pattern(base: &NormalizedPath, spec: &str) -> String {
    base.join(spec).as_str().to_string()
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains('*') || segment.contains('?')
}

/// A spec without wildcards whose last segment has no extension names a
/// directory.
fn is_directory_spec(spec: &str) -> bool {
    let last = spec.trim_end_matches('/').rsplit('/').next().unwrap_or(spec);
    !has_wildcard(spec) && !last.contains('.')
}

/// Extensions recognized as source files, in priority order.
pub fn supported_extensions(options: &CompilerOptions) -> Vec<&'static str> {
    let mut extensions = TS_EXTENSIONS.to_vec();
    if options.allow_js() {
        extensions.extend_from_slice(JS_EXTENSIONS);
    }
    extensions
}

fn extension_of<'a>(path: &NormalizedPath, extensions: &[&'a str]) -> Option<&'a str> {
    // ".d.ts" before ".ts" so declaration files get their own priority.
    if path.has_extension(".d.ts") && extensions.contains(&".d.ts") {
        return Some(".d.ts");
    }
    extensions.iter().copied().find(|ext| path.has_extension(ext))
}

fn extension_priority(extension: &str) -> u8 {
    match extension {
        ".ts" | ".tsx" => 0,
        _ => 1,
    }
}

/// Root file names selected by `specs`: literal files first, in order, then
/// wildcard matches sorted by path.
pub fn expand_file_names(
    host: &dyn ServerHost,
    specs: &ConfigFileSpecs,
    options: &CompilerOptions,
    matcher: &WildcardMatcher,
) -> Vec<NormalizedPath> {
    let mut result: Vec<NormalizedPath> = Vec::new();
    for file in specs.files.iter().flatten() {
        let path = specs.base_dir.join(file);
        if !result.contains(&path) {
            result.push(path);
        }
    }

    if !matcher.has_include {
        return result;
    }

    // Keyed by (directory, stem) so a.ts hides a.js and a.d.ts.
    let mut by_stem: BTreeMap<(String, String), Vec<(u8, NormalizedPath)>> = BTreeMap::new();
    let extensions = supported_extensions(options);
    for (dir, recursive) in wildcard_directories(specs) {
        collect_files(host, &dir, recursive, matcher, &extensions, &mut by_stem);
    }

    let mut wildcard_files: Vec<NormalizedPath> = Vec::new();
    for candidates in by_stem.into_values() {
        let best = candidates.iter().map(|(p, _)| *p).min().unwrap_or(0);
        for (priority, path) in candidates {
            if priority == best && !wildcard_files.contains(&path) {
                wildcard_files.push(path);
            }
        }
    }
    wildcard_files.sort();
    for path in wildcard_files {
        if !result.contains(&path) {
            result.push(path);
        }
    }
    result
}

fn collect_files(
    host: &dyn ServerHost,
    dir: &NormalizedPath,
    recursive: bool,
    matcher: &WildcardMatcher,
    extensions: &[&'static str],
    out: &mut BTreeMap<(String, String), Vec<(u8, NormalizedPath)>>,
) {
    if matcher.is_excluded(dir) {
        return;
    }
    let entries = host.directory_entries(dir);
    for name in &entries.files {
        let path = dir.join(name);
        if !matcher.matches_file(&path) {
            continue;
        }
        let Some(extension) = extension_of(&path, extensions) else {
            continue;
        };
        let stem = name[..name.len() - extension.len()].to_ascii_lowercase();
        let entry = out
            .entry((dir.as_str().to_string(), stem))
            .or_default();
        if !entry.iter().any(|(_, p)| p == &path) {
            entry.push((extension_priority(extension), path));
        }
    }
    if !recursive {
        return;
    }
    for name in &entries.directories {
        if name.starts_with('.') {
            continue;
        }
        collect_files(host, &dir.join(name), true, matcher, extensions, out);
    }
}

/// Directories to watch for file additions, mapped to whether the watch
/// must be recursive. Directories nested in a recursive one are dropped.
pub fn wildcard_directories(specs: &ConfigFileSpecs) -> IndexMap<NormalizedPath, bool> {
    let mut found: Vec<(NormalizedPath, bool)> = Vec::new();
    for spec in specs.effective_include() {
        let absolute = specs.base_dir.join(&spec);
        let segments: Vec<&str> = absolute.as_str().split('/').collect();
        let candidate = match segments.iter().position(|s| has_wildcard(s)) {
            Some(idx) => {
                let dir = segments[..idx].join("/");
                let rest = &segments[idx..];
                let recursive = rest.len() > 1 || rest.iter().any(|s| s.contains("**"));
                let dir = if dir.is_empty() { "/".to_string() } else { dir };
                Some((NormalizedPath::from_absolute(&dir), recursive))
            }
            None if is_directory_spec(&spec) => Some((absolute, true)),
            None => None,
        };
        if let Some((dir, recursive)) = candidate {
            match found.iter_mut().find(|(d, _)| d == &dir) {
                Some(existing) => existing.1 |= recursive,
                None => found.push((dir, recursive)),
            }
        }
    }

    let mut result = IndexMap::new();
    for (dir, recursive) in &found {
        let covered = found
            .iter()
            .any(|(other, other_recursive)| *other_recursive && other != dir && dir.is_within(other));
        if !covered {
            result.insert(dir.clone(), *recursive);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryHost;

    fn specs(files: Option<&[&str]>, include: Option<&[&str]>, exclude: Option<&[&str]>) -> ConfigFileSpecs {
        let to_vec = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        ConfigFileSpecs {
            files: files.map(to_vec),
            include: include.map(to_vec),
            exclude: exclude.map(to_vec),
            base_dir: NormalizedPath::from_absolute("/p"),
        }
    }

    fn names(paths: &[NormalizedPath]) -> Vec<&str> {
        paths.iter().map(|p| p.as_str()).collect()
    }

    fn expand(host: &MemoryHost, specs: &ConfigFileSpecs, options: &CompilerOptions) -> Vec<NormalizedPath> {
        let matcher = WildcardMatcher::new(specs, options, true).unwrap();
        expand_file_names(host, specs, options, &matcher)
    }

    #[test]
    fn test_default_include_skips_node_modules() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "");
        host.add_file("/p/src/b.tsx", "");
        host.add_file("/p/node_modules/x/index.d.ts", "");
        host.add_file("/p/c.js", "");
        let specs = specs(None, None, None);
        let files = expand(&host, &specs, &CompilerOptions::default());
        assert_eq!(names(&files), vec!["/p/a.ts", "/p/src/b.tsx"]);
    }

    #[test]
    fn test_allow_js_includes_js() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "");
        host.add_file("/p/c.js", "");
        let options = CompilerOptions {
            allow_js: Some(true),
            ..CompilerOptions::default()
        };
        let files = expand(&host, &specs(None, None, None), &options);
        assert_eq!(names(&files), vec!["/p/a.ts", "/p/c.js"]);
    }

    #[test]
    fn test_files_only_does_not_glob() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "");
        host.add_file("/p/b.ts", "");
        let files = expand(&host, &specs(Some(&["a.ts"]), None, None), &CompilerOptions::default());
        assert_eq!(names(&files), vec!["/p/a.ts"]);
    }

    #[test]
    fn test_ts_hides_lower_priority_siblings() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "");
        host.add_file("/p/a.d.ts", "");
        host.add_file("/p/b.d.ts", "");
        let files = expand(&host, &specs(None, None, None), &CompilerOptions::default());
        assert_eq!(names(&files), vec!["/p/a.ts", "/p/b.d.ts"]);
    }

    #[test]
    fn test_include_directory_and_exclude() {
        let host = MemoryHost::new();
        host.add_file("/p/src/a.ts", "");
        host.add_file("/p/src/gen/b.ts", "");
        host.add_file("/p/test/c.ts", "");
        let specs = specs(None, Some(&["src"]), Some(&["src/gen"]));
        let files = expand(&host, &specs, &CompilerOptions::default());
        assert_eq!(names(&files), vec!["/p/src/a.ts"]);
    }

    #[test]
    fn test_out_dir_excluded_by_default() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "");
        host.add_file("/p/dist/a.d.ts", "");
        let options = CompilerOptions {
            out_dir: Some("dist".to_string()),
            ..CompilerOptions::default()
        };
        let files = expand(&host, &specs(None, None, None), &options);
        assert_eq!(names(&files), vec!["/p/a.ts"]);
    }

    #[test]
    fn test_wildcard_directories() {
        let dirs = wildcard_directories(&specs(None, Some(&["src/**/*", "src/lib/*.ts", "types/*.d.ts"]), None));
        let dirs: Vec<(&str, bool)> = dirs.iter().map(|(d, r)| (d.as_str(), *r)).collect();
        assert_eq!(dirs, vec![("/p/src", true), ("/p/types", false)]);

        let default = wildcard_directories(&specs(None, None, None));
        assert_eq!(default.get(&NormalizedPath::from_absolute("/p")), Some(&true));

        assert!(wildcard_directories(&specs(Some(&["a.ts"]), None, None)).is_empty());
    }

    #[test]
    fn test_matches_file() {
        let specs = specs(None, Some(&["src/*.ts"]), None);
        let matcher = WildcardMatcher::new(&specs, &CompilerOptions::default(), true).unwrap();
        assert!(matcher.matches_file(&NormalizedPath::from_absolute("/p/src/a.ts")));
        assert!(!matcher.matches_file(&NormalizedPath::from_absolute("/p/src/deep/a.ts")));
        assert!(!matcher.matches_file(&NormalizedPath::from_absolute("/p/src/a.js")));
        assert!(!matcher.matches_file(&NormalizedPath::from_absolute("/p/src/.a.ts")));
    }
}
