//
// project/resolution.rs
//
// Module resolution and the per-project resolution cache
//

use std::collections::HashMap;

use serde_json::Value;

use super::references::{FileReference, ReferenceKind};
use crate::config_file::CompilerOptions;
use crate::host::ServerHost;
use crate::path::{CanonicalPath, NormalizedPath};

const TS_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".d.ts"];
const JS_EXTENSIONS: &[&str] = &[".js", ".jsx"];

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedModule {
    pub resolved: Option<NormalizedPath>,
    /// Candidates tried that did not exist.
    pub failed_lookups: Vec<NormalizedPath>,
    /// Resolved through `node_modules`.
    pub is_external_library: bool,
}

struct Lookup<'a> {
    host: &'a dyn ServerHost,
    failed: Vec<NormalizedPath>,
}

impl Lookup<'_> {
    fn exists(&mut self, path: &NormalizedPath) -> bool {
        if self.host.file_exists(path) {
            true
        } else {
            self.failed.push(path.clone());
            false
        }
    }

    /// Try `base` as a file: exact name if it has a known extension (with
    /// `.js` mapped to its TypeScript sources first), then with each
    /// extension appended.
    fn try_file(&mut self, base: &NormalizedPath, extensions: &[&str]) -> Option<NormalizedPath> {
        let name = base.as_str();
        for js in JS_EXTENSIONS {
            if let Some(stem) = name.strip_suffix(js) {
                for ts in TS_EXTENSIONS {
                    let candidate = NormalizedPath::from_absolute(&format!("{}{}", stem, ts));
                    if self.exists(&candidate) {
                        return Some(candidate);
                    }
                }
                if extensions.contains(js) && self.exists(base) {
                    return Some(base.clone());
                }
                return None;
            }
        }
        if extensions.iter().any(|ext| name.ends_with(ext)) && self.exists(base) {
            return Some(base.clone());
        }
        for ext in extensions {
            let candidate = NormalizedPath::from_absolute(&format!("{}{}", name, ext));
            if self.exists(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Try `dir` as a package or a directory with an index file.
    fn try_directory(&mut self, dir: &NormalizedPath, extensions: &[&str]) -> Option<NormalizedPath> {
        let package_json = dir.join("package.json");
        if self.host.file_exists(&package_json) {
            if let Ok(text) = self.host.read_file(&package_json) {
                if let Ok(json) = serde_json::from_str::<Value>(&text) {
                    for field in ["types", "typings", "main"] {
                        let Some(entry) = json.get(field).and_then(Value::as_str) else {
                            continue;
                        };
                        let target = dir.join(entry);
                        if let Some(found) = self.try_file(&target, extensions) {
                            return Some(found);
                        }
                        if let Some(found) = self.try_index(&target, extensions) {
                            return Some(found);
                        }
                    }
                }
            }
        } else {
            self.failed.push(package_json);
        }
        self.try_index(dir, extensions)
    }

    fn try_index(&mut self, dir: &NormalizedPath, extensions: &[&str]) -> Option<NormalizedPath> {
        for ext in extensions {
            let candidate = dir.join(&format!("index{}", ext));
            if self.exists(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn try_file_or_directory(&mut self, base: &NormalizedPath, extensions: &[&str]) -> Option<NormalizedPath> {
        self.try_file(base, extensions)
            .or_else(|| self.try_directory(base, extensions))
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || specifier.starts_with('/')
        || (specifier.len() > 1 && specifier.as_bytes()[1] == b':')
}

/// `@scope/name` becomes `scope__name` under `@types`.
fn types_package_name(package: &str) -> String {
    match package.strip_prefix('@') {
        Some(scoped) => scoped.replacen('/', "__", 1),
        None => package.to_string(),
    }
}

fn extensions_for(options: &CompilerOptions, in_node_modules: bool) -> Vec<&'static str> {
    let mut extensions = TS_EXTENSIONS.to_vec();
    if options.allow_js() || (in_node_modules && options.max_node_module_js_depth() > 0) {
        extensions.extend_from_slice(JS_EXTENSIONS);
    }
    extensions
}

/// Resolve `reference`, made from a file in `containing_dir`.
pub fn resolve_reference(
    host: &dyn ServerHost,
    containing_dir: &NormalizedPath,
    reference: &FileReference,
    options: &CompilerOptions,
) -> ResolvedModule {
    let mut lookup = Lookup {
        host,
        failed: Vec::new(),
    };
    let specifier = reference.specifier.as_str();
    let mut is_external_library = false;

    let resolved = match reference.kind {
        ReferenceKind::Path => {
            let target = containing_dir.join(specifier);
            lookup.try_file(&target, &extensions_for(options, false))
        }
        ReferenceKind::Types => {
            is_external_library = true;
            lookup_node_modules(&mut lookup, containing_dir, specifier, options, true)
        }
        ReferenceKind::Module if is_relative(specifier) => {
            let target = containing_dir.join(specifier);
            lookup.try_file_or_directory(&target, &extensions_for(options, false))
        }
        ReferenceKind::Module => {
            is_external_library = true;
            lookup_node_modules(&mut lookup, containing_dir, specifier, options, false)
        }
    };

    ResolvedModule {
        is_external_library: is_external_library && resolved.is_some(),
        resolved,
        failed_lookups: lookup.failed,
    }
}

fn lookup_node_modules(
    lookup: &mut Lookup<'_>,
    containing_dir: &NormalizedPath,
    package: &str,
    options: &CompilerOptions,
    types_only: bool,
) -> Option<NormalizedPath> {
    let ts_only = TS_EXTENSIONS.to_vec();
    let with_js = extensions_for(options, true);
    for dir in std::iter::once(containing_dir.clone()).chain(containing_dir.ancestors()) {
        if dir.file_name() == "node_modules" {
            continue;
        }
        let node_modules = dir.join("node_modules");
        if !types_only {
            let base = node_modules.join(package);
            if let Some(found) = lookup.try_file_or_directory(&base, &with_js) {
                return Some(found);
            }
        }
        let types = node_modules.join("@types").join(&types_package_name(package));
        if let Some(found) = lookup.try_file_or_directory(&types, &ts_only) {
            return Some(found);
        }
    }
    None
}

/// Resolutions of one project, keyed by (containing directory, specifier,
/// kind). Entries are invalidated by file creation and deletion.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<(CanonicalPath, String, ReferenceKind), ResolvedModule>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        host: &dyn ServerHost,
        containing_dir: &NormalizedPath,
        reference: &FileReference,
        options: &CompilerOptions,
    ) -> &ResolvedModule {
        let key = (
            containing_dir.to_canonical(host.use_case_sensitive_file_names()),
            reference.specifier.clone(),
            reference.kind,
        );
        self.entries
            .entry(key)
            .or_insert_with(|| resolve_reference(host, containing_dir, reference, options))
    }

    /// Drop entries a creation or deletion at `path` may have changed.
    /// Returns true when something was dropped.
    pub fn invalidate_for_path(&mut self, path: &NormalizedPath) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, resolved| {
            let resolved_affected = resolved
                .resolved
                .as_ref()
                .is_some_and(|r| r.is_within(path));
            let lookup_affected = resolved
                .failed_lookups
                .iter()
                .any(|failed| failed.is_within(path) || path.is_within(failed));
            !(resolved_affected || lookup_affected)
        });
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shrink_to_fit(&mut self) {
        self.entries.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryHost;
    use crate::text::TextSpan;

    fn module(specifier: &str) -> FileReference {
        FileReference {
            specifier: specifier.to_string(),
            kind: ReferenceKind::Module,
            span: TextSpan::default(),
        }
    }

    fn resolve(host: &MemoryHost, dir: &str, specifier: &str, options: &CompilerOptions) -> ResolvedModule {
        resolve_reference(host, &NormalizedPath::from_absolute(dir), &module(specifier), options)
    }

    #[test]
    fn test_relative_extension_probing() {
        let host = MemoryHost::new();
        host.add_file("/p/b.tsx", "");
        let result = resolve(&host, "/p", "./b", &CompilerOptions::default());
        assert_eq!(result.resolved.unwrap().as_str(), "/p/b.tsx");
        assert!(result.failed_lookups.iter().any(|f| f.as_str() == "/p/b.ts"));
        assert!(!result.is_external_library);
    }

    #[test]
    fn test_js_specifier_maps_to_ts_source() {
        let host = MemoryHost::new();
        host.add_file("/p/b.ts", "");
        let result = resolve(&host, "/p", "./b.js", &CompilerOptions::default());
        assert_eq!(result.resolved.unwrap().as_str(), "/p/b.ts");
    }

    #[test]
    fn test_js_requires_allow_js() {
        let host = MemoryHost::new();
        host.add_file("/p/b.js", "");
        assert!(resolve(&host, "/p", "./b", &CompilerOptions::default()).resolved.is_none());
        let options = CompilerOptions {
            allow_js: Some(true),
            ..CompilerOptions::default()
        };
        assert_eq!(resolve(&host, "/p", "./b", &options).resolved.unwrap().as_str(), "/p/b.js");
    }

    #[test]
    fn test_directory_index() {
        let host = MemoryHost::new();
        host.add_file("/p/lib/index.ts", "");
        let result = resolve(&host, "/p", "./lib", &CompilerOptions::default());
        assert_eq!(result.resolved.unwrap().as_str(), "/p/lib/index.ts");
    }

    #[test]
    fn test_node_modules_package_types_field() {
        let host = MemoryHost::new();
        host.add_file("/p/node_modules/pkg/package.json", r#"{"types":"dist/main.d.ts"}"#);
        host.add_file("/p/node_modules/pkg/dist/main.d.ts", "");
        let result = resolve(&host, "/p/src", "pkg", &CompilerOptions::default());
        assert_eq!(result.resolved.unwrap().as_str(), "/p/node_modules/pkg/dist/main.d.ts");
        assert!(result.is_external_library);
    }

    #[test]
    fn test_at_types_fallback() {
        let host = MemoryHost::new();
        host.add_file("/p/node_modules/@types/scope__pkg/index.d.ts", "");
        let result = resolve(&host, "/p", "@scope/pkg", &CompilerOptions::default());
        assert_eq!(
            result.resolved.unwrap().as_str(),
            "/p/node_modules/@types/scope__pkg/index.d.ts"
        );
    }

    #[test]
    fn test_cache_invalidated_by_creation_at_failed_lookup() {
        let host = MemoryHost::new();
        let mut cache = ResolutionCache::new();
        let dir = NormalizedPath::from_absolute("/p");
        let options = CompilerOptions::default();
        assert!(cache.resolve(&host, &dir, &module("./b"), &options).resolved.is_none());

        host.add_file("/p/b.ts", "");
        // Still cached.
        assert!(cache.resolve(&host, &dir, &module("./b"), &options).resolved.is_none());

        assert!(cache.invalidate_for_path(&NormalizedPath::from_absolute("/p/b.ts")));
        assert!(cache.resolve(&host, &dir, &module("./b"), &options).resolved.is_some());
    }

    #[test]
    fn test_cache_invalidated_by_deletion_of_resolved_file() {
        let host = MemoryHost::new();
        host.add_file("/p/b.ts", "");
        let mut cache = ResolutionCache::new();
        let dir = NormalizedPath::from_absolute("/p");
        let options = CompilerOptions::default();
        cache.resolve(&host, &dir, &module("./b"), &options);
        assert!(!cache.invalidate_for_path(&NormalizedPath::from_absolute("/p/other.ts")));
        assert!(cache.invalidate_for_path(&NormalizedPath::from_absolute("/p/b.ts")));
        assert!(cache.is_empty());
    }
}
