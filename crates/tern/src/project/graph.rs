//
// project/graph.rs
//
// Program construction: the incremental update of a project's file set
//

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;

use super::references::scan_references;
use super::Project;
use crate::config_file::CompilerOptions;
use crate::error::{ProjectServiceError, Result};
use crate::host::ServerHost;
use crate::path::{CanonicalPath, NormalizedPath};
use crate::script_info::ScriptKind;
use crate::script_registry::ScriptRegistry;
use crate::service::watch::{WatchRegistry, WatchRoute};

/// Service state an update reads and writes besides the project itself.
pub struct UpdateContext<'a> {
    pub host: &'a dyn ServerHost,
    pub registry: &'a mut ScriptRegistry,
    pub watches: &'a mut WatchRegistry,
    pub max_file_size: u64,
    pub default_library: Option<&'a NormalizedPath>,
}

/// What an update changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphUpdate {
    pub has_new_program: bool,
    pub added: Vec<NormalizedPath>,
    pub removed: Vec<NormalizedPath>,
    /// Files that were too large to load, with their size in bytes.
    pub large_files: Vec<(NormalizedPath, u64)>,
}

impl Project {
    /// Recompute the program from the roots if the project is dirty.
    ///
    /// A clean project is left untouched. Otherwise membership edges,
    /// missing-file watchers and failed-lookup watchers are brought in line
    /// with the new program, and the program version moves only when the
    /// file set or some file's content changed.
    pub fn update_graph(&mut self, ctx: &mut UpdateContext<'_>) -> Result<GraphUpdate> {
        if self.closed {
            return Err(ProjectServiceError::Internal(format!(
                "update requested for closed project {}",
                self.name
            )));
        }
        if !self.dirty {
            return Ok(GraphUpdate::default());
        }
        let case_sensitive = ctx.host.use_case_sensitive_file_names();
        if self.options_changed {
            self.resolution_cache.clear();
            self.reference_cache.clear();
            self.options_changed = false;
        }

        let mut program: IndexMap<CanonicalPath, NormalizedPath> = IndexMap::new();
        let mut missing: IndexMap<CanonicalPath, NormalizedPath> = IndexMap::new();
        let mut failed_directories: IndexMap<CanonicalPath, NormalizedPath> = IndexMap::new();
        let mut unresolved = HashMap::new();
        let mut large_files = Vec::new();
        let mut queue: VecDeque<(NormalizedPath, u32)> = VecDeque::new();

        for (path, file) in &self.root_files {
            let available = ctx.host.file_exists(file)
                || ctx
                    .registry
                    .get(path)
                    .is_some_and(|info| info.is_open() || info.is_dynamic());
            if available {
                queue.push_back((file.clone(), 0));
            } else {
                missing.insert(path.clone(), file.clone());
            }
        }
        for file in &self.external_files {
            if ctx.host.file_exists(file) {
                queue.push_back((file.clone(), 0));
            }
        }
        if self.language_service_enabled && !self.options.no_lib() {
            if let Some(library) = ctx.default_library.filter(|lib| ctx.host.file_exists(lib)) {
                queue.push_back((library.clone(), 0));
            }
        }

        while let Some((file, depth)) = queue.pop_front() {
            let path = file.to_canonical(case_sensitive);
            if program.contains_key(&path) {
                continue;
            }
            program.insert(path.clone(), file.clone());

            let (info, created) = ctx.registry.get_or_create(&file, ScriptKind::Unknown, false);
            if created && !info.is_open() && !info.is_dynamic() {
                let watcher = ctx
                    .watches
                    .watch_file(ctx.host, &file, WatchRoute::ScriptInfo(path.clone()));
                info.set_file_watcher(Some(watcher));
            }
            let outcome = info.ensure_loaded(ctx.host, ctx.max_file_size);
            if let Some(size) = outcome.too_large {
                large_files.push((file.clone(), size));
            }

            // Syntax-only projects are the roots alone.
            if !self.language_service_enabled {
                continue;
            }

            let content_version = info.content_version();
            let references = match self.reference_cache.get(&path) {
                Some((version, references)) if *version == content_version => references.clone(),
                _ => {
                    let references = scan_references(&info.text().unwrap_or_default());
                    self.reference_cache
                        .insert(path.clone(), (content_version, references.clone()));
                    references
                }
            };

            let Some(directory) = file.parent() else {
                continue;
            };
            for reference in references {
                let resolved = self
                    .resolution_cache
                    .resolve(ctx.host, &directory, &reference, &self.options)
                    .clone();
                for failed in &resolved.failed_lookups {
                    if let Some(watched) = watchable_directory(ctx.host, failed) {
                        failed_directories
                            .entry(watched.to_canonical(case_sensitive))
                            .or_insert(watched);
                    }
                }
                match resolved.resolved {
                    Some(target) => {
                        if let Some(next_depth) = admitted_depth(&self.options, &target, depth) {
                            queue.push_back((target, next_depth));
                        }
                    }
                    None => unresolved
                        .entry(path.clone())
                        .or_insert_with(Vec::new)
                        .push(reference),
                }
            }
        }

        // Membership edges.
        let removed: Vec<(CanonicalPath, NormalizedPath)> = self
            .program_files
            .iter()
            .filter(|(path, _)| !program.contains_key(*path))
            .map(|(path, file)| (path.clone(), file.clone()))
            .collect();
        let added: Vec<NormalizedPath> = program
            .iter()
            .filter(|(path, _)| !self.program_files.contains_key(*path))
            .map(|(_, file)| file.clone())
            .collect();
        for (path, _) in &removed {
            if let Some(info) = ctx.registry.get_mut(path) {
                info.detach_from_project(self.id);
            }
        }
        let mut content_changed = false;
        let mut file_versions = HashMap::with_capacity(program.len());
        for path in program.keys() {
            let Some(info) = ctx.registry.get_mut(path) else {
                continue;
            };
            info.attach_to_project(self.id);
            let version = info.content_version();
            if self.file_versions.get(path).is_some_and(|old| *old != version) {
                content_changed = true;
            }
            file_versions.insert(path.clone(), version);
        }

        // Watchers for missing roots.
        let mut previous = std::mem::take(&mut self.missing_files);
        for (path, file) in missing {
            let entry = match previous.shift_remove(&path) {
                Some(entry) => entry,
                None => {
                    let route = WatchRoute::MissingFile {
                        project: self.id,
                        file: file.clone(),
                    };
                    let watcher = ctx.watches.watch_file(ctx.host, &file, route);
                    (file, watcher)
                }
            };
            self.missing_files.insert(path, entry);
        }
        for (_, (_, watcher)) in previous {
            ctx.watches.close(ctx.host, watcher);
        }

        // Watchers for failed lookup locations.
        let mut previous = std::mem::take(&mut self.failed_lookup_watchers);
        for (path, directory) in failed_directories {
            let entry = match previous.shift_remove(&path) {
                Some(entry) => entry,
                None => {
                    let route = WatchRoute::FailedLookup {
                        project: self.id,
                        directory: directory.clone(),
                    };
                    let watcher = ctx.watches.watch_directory(ctx.host, &directory, false, route);
                    (directory, watcher)
                }
            };
            self.failed_lookup_watchers.insert(path, entry);
        }
        for (_, (_, watcher)) in previous {
            ctx.watches.close(ctx.host, watcher);
        }

        let has_new_program =
            self.program_version == 0 || !added.is_empty() || !removed.is_empty() || content_changed;
        self.program_files = program;
        self.file_versions = file_versions;
        self.unresolved = unresolved;
        self.reference_cache
            .retain(|path, _| self.program_files.contains_key(path));
        if has_new_program {
            self.program_version += 1;
        }
        self.dirty = false;

        log::trace!(
            "Updated project {}: {} files (+{} -{}), program version {}",
            self.name,
            self.program_files.len(),
            added.len(),
            removed.len(),
            self.program_version
        );

        Ok(GraphUpdate {
            has_new_program,
            added,
            removed: removed.into_iter().map(|(_, file)| file).collect(),
            large_files,
        })
    }
}

/// The `node_modules` JavaScript depth at which `target` enters the
/// program, or `None` when it is excluded.
fn admitted_depth(options: &CompilerOptions, target: &NormalizedPath, depth: u32) -> Option<u32> {
    if !ScriptKind::from_file_name(target).is_javascript() {
        return Some(depth);
    }
    if target.is_in_node_modules() {
        let next = depth + 1;
        (next <= options.max_node_module_js_depth()).then_some(next)
    } else {
        options.allow_js().then_some(0)
    }
}

/// Nearest existing directory above a failed lookup. The root is never
/// watched.
fn watchable_directory(host: &dyn ServerHost, failed: &NormalizedPath) -> Option<NormalizedPath> {
    failed
        .ancestors()
        .find(|dir| host.directory_exists(dir))
        .filter(|dir| dir.parent().is_some())
}

/// First file at which the summed size of non-TypeScript roots passes
/// `limit`, or `None` when the project stays under it.
pub fn exceeds_non_ts_size_limit(
    host: &dyn ServerHost,
    options: &CompilerOptions,
    files: &[NormalizedPath],
    limit: u64,
) -> Option<NormalizedPath> {
    if options.disable_size_limit() {
        return None;
    }
    let mut total: u64 = 0;
    for file in files {
        if ScriptKind::from_file_name(file).is_typescript() {
            continue;
        }
        total += host.file_size(file).unwrap_or(0);
        if total > limit {
            return Some(file.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{InferredState, ProjectId, ProjectVariant};
    use crate::test_utils::MemoryHost;

    struct Fixture {
        host: MemoryHost,
        registry: ScriptRegistry,
        watches: WatchRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                host: MemoryHost::new(),
                registry: ScriptRegistry::new(true, 8),
                watches: WatchRegistry::new(),
            }
        }

        fn update(&mut self, project: &mut Project) -> GraphUpdate {
            let mut ctx = UpdateContext {
                host: &self.host,
                registry: &mut self.registry,
                watches: &mut self.watches,
                max_file_size: 4 * 1024 * 1024,
                default_library: None,
            };
            project.update_graph(&mut ctx).unwrap()
        }
    }

    fn project(options: CompilerOptions, roots: &[&str]) -> Project {
        let mut project = Project::new(
            ProjectId(1),
            "/dev/null/inferredProject1*".to_string(),
            ProjectVariant::Inferred(InferredState {
                project_root: None,
                current_directory: NormalizedPath::from_absolute("/p"),
                is_shared: false,
            }),
            options,
        );
        for root in roots {
            let file = NormalizedPath::from_absolute(root);
            project.add_root(file.to_canonical(true), file);
        }
        project
    }

    fn file_names(project: &Project) -> Vec<String> {
        project.files().map(|(_, f)| f.as_str().to_string()).collect()
    }

    fn key(path: &str) -> CanonicalPath {
        NormalizedPath::from_absolute(path).to_canonical(true)
    }

    #[test]
    fn test_walks_references_breadth_first() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "import { b } from './b';\nimport './c';");
        fx.host.add_file("/p/b.ts", "import { d } from './d';");
        fx.host.add_file("/p/c.ts", "");
        fx.host.add_file("/p/d.ts", "");
        let mut project = project(CompilerOptions::default(), &["/p/a.ts"]);

        let update = fx.update(&mut project);
        assert!(update.has_new_program);
        assert_eq!(file_names(&project), vec!["/p/a.ts", "/p/b.ts", "/p/c.ts", "/p/d.ts"]);
        assert_eq!(project.program_version(), 1);
        assert!(!project.is_dirty());
        assert!(fx.registry.get(&key("/p/d.ts")).unwrap().is_attached(ProjectId(1)));
    }

    #[test]
    fn test_clean_project_is_not_recomputed() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "");
        let mut project = project(CompilerOptions::default(), &["/p/a.ts"]);
        fx.update(&mut project);
        let version = project.program_version();

        let update = fx.update(&mut project);
        assert_eq!(update, GraphUpdate::default());
        assert_eq!(project.program_version(), version);
    }

    #[test]
    fn test_dirty_without_changes_keeps_program_version() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "import './b';");
        fx.host.add_file("/p/b.ts", "");
        let mut project = project(CompilerOptions::default(), &["/p/a.ts"]);
        fx.update(&mut project);

        project.mark_as_dirty();
        let update = fx.update(&mut project);
        assert!(!update.has_new_program);
        assert_eq!(project.program_version(), 1);
    }

    #[test]
    fn test_content_change_produces_new_program() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "let a = 1;");
        let mut project = project(CompilerOptions::default(), &["/p/a.ts"]);
        fx.update(&mut project);

        let info = fx.registry.get_mut(&key("/p/a.ts")).unwrap();
        info.open(None);
        info.edit_content(0, 0, "// ");
        project.mark_as_dirty();
        assert!(fx.update(&mut project).has_new_program);
        assert_eq!(project.program_version(), 2);
    }

    #[test]
    fn test_removed_import_detaches_file() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "import './b';");
        fx.host.add_file("/p/b.ts", "");
        let mut project = project(CompilerOptions::default(), &["/p/a.ts"]);
        fx.update(&mut project);

        let info = fx.registry.get_mut(&key("/p/a.ts")).unwrap();
        info.open(None);
        info.edit_content(0, 13, "");
        project.mark_as_dirty();
        let update = fx.update(&mut project);
        assert_eq!(update.removed, vec![NormalizedPath::from_absolute("/p/b.ts")]);
        assert!(fx.registry.get(&key("/p/b.ts")).unwrap().containing_projects().is_empty());
    }

    #[test]
    fn test_missing_root_is_watched_until_created() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "");
        let mut project = project(CompilerOptions::default(), &["/p/a.ts", "/p/later.ts"]);
        fx.update(&mut project);
        assert_eq!(project.missing_files().count(), 1);
        let missing_watchers = fx
            .watches
            .count_matching(|route| matches!(route, WatchRoute::MissingFile { .. }));
        assert_eq!(missing_watchers, 1);

        fx.host.add_file("/p/later.ts", "");
        project.mark_as_dirty();
        fx.update(&mut project);
        assert_eq!(project.missing_files().count(), 0);
        assert!(project.contains_file(&key("/p/later.ts")));
        let missing_watchers = fx
            .watches
            .count_matching(|route| matches!(route, WatchRoute::MissingFile { .. }));
        assert_eq!(missing_watchers, 0);
    }

    #[test]
    fn test_unresolved_import_watches_failed_lookup_directory() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/src/a.ts", "import { x } from '../lib/x';");
        let mut project = project(CompilerOptions::default(), &["/p/src/a.ts"]);
        fx.update(&mut project);

        assert_eq!(project.unresolved_references(&key("/p/src/a.ts")).len(), 1);
        let dirs: Vec<&str> = project.failed_lookup_directories().map(|d| d.as_str()).collect();
        assert_eq!(dirs, vec!["/p"]);
    }

    #[test]
    fn test_js_needs_allow_js_outside_node_modules() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "import './util.js';");
        fx.host.add_file("/p/util.js", "");

        let mut strict = project(CompilerOptions::default(), &["/p/a.ts"]);
        fx.update(&mut strict);
        assert!(!strict.contains_file(&key("/p/util.js")));

        let options = CompilerOptions {
            allow_js: Some(true),
            ..CompilerOptions::default()
        };
        let mut loose = project(options, &["/p/a.ts"]);
        fx.update(&mut loose);
        assert!(loose.contains_file(&key("/p/util.js")));
    }

    #[test]
    fn test_node_modules_js_depth_is_capped() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.js", "require('one');");
        fx.host.add_file("/p/node_modules/one/index.js", "require('two');");
        fx.host.add_file("/p/node_modules/two/index.js", "");
        let options = CompilerOptions {
            allow_js: Some(true),
            max_node_module_js_depth: Some(1),
            ..CompilerOptions::default()
        };
        let mut project = project(options, &["/p/a.js"]);
        fx.update(&mut project);
        assert!(project.contains_file(&key("/p/node_modules/one/index.js")));
        assert!(!project.contains_file(&key("/p/node_modules/two/index.js")));
    }

    #[test]
    fn test_syntax_only_program_is_roots() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "import './b';");
        fx.host.add_file("/p/b.ts", "");
        let mut project = project(CompilerOptions::default(), &["/p/a.ts"]);
        project.disable_language_service(None);
        fx.update(&mut project);
        assert_eq!(file_names(&project), vec!["/p/a.ts"]);
    }

    #[test]
    fn test_default_library_respects_no_lib() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", "");
        fx.host.add_file("/lib/lib.d.ts", "");
        let library = NormalizedPath::from_absolute("/lib/lib.d.ts");

        for (no_lib, expected) in [(false, true), (true, false)] {
            let options = CompilerOptions {
                no_lib: Some(no_lib),
                ..CompilerOptions::default()
            };
            let mut project = project(options, &["/p/a.ts"]);
            let mut ctx = UpdateContext {
                host: &fx.host,
                registry: &mut fx.registry,
                watches: &mut fx.watches,
                max_file_size: 1024,
                default_library: Some(&library),
            };
            project.update_graph(&mut ctx).unwrap();
            assert_eq!(project.contains_file(&library.to_canonical(true)), expected);
        }
    }

    #[test]
    fn test_large_file_reported() {
        let mut fx = Fixture::new();
        fx.host.add_file("/p/a.ts", &"x".repeat(64));
        let mut project = project(CompilerOptions::default(), &["/p/a.ts"]);
        let mut ctx = UpdateContext {
            host: &fx.host,
            registry: &mut fx.registry,
            watches: &mut fx.watches,
            max_file_size: 16,
            default_library: None,
        };
        let update = project.update_graph(&mut ctx).unwrap();
        assert_eq!(update.large_files, vec![(NormalizedPath::from_absolute("/p/a.ts"), 64)]);
    }

    #[test]
    fn test_non_ts_size_limit() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", &"x".repeat(100));
        host.add_file("/p/big.js", &"x".repeat(60));
        host.add_file("/p/bigger.js", &"x".repeat(60));
        let files: Vec<NormalizedPath> = ["/p/a.ts", "/p/big.js", "/p/bigger.js"]
            .iter()
            .map(|f| NormalizedPath::from_absolute(f))
            .collect();
        let options = CompilerOptions::default();
        assert_eq!(
            exceeds_non_ts_size_limit(&host, &options, &files, 100),
            Some(NormalizedPath::from_absolute("/p/bigger.js"))
        );
        assert_eq!(exceeds_non_ts_size_limit(&host, &options, &files, 200), None);

        let unlimited = CompilerOptions {
            disable_size_limit: Some(true),
            ..CompilerOptions::default()
        };
        assert_eq!(exceeds_non_ts_size_limit(&host, &unlimited, &files, 100), None);
    }

    #[test]
    fn test_closed_project_update_is_an_error() {
        let mut fx = Fixture::new();
        let mut project = project(CompilerOptions::default(), &[]);
        project.close(&fx.host, &mut fx.registry, &mut fx.watches);
        let mut ctx = UpdateContext {
            host: &fx.host,
            registry: &mut fx.registry,
            watches: &mut fx.watches,
            max_file_size: 16,
            default_library: None,
        };
        assert!(matches!(
            project.update_graph(&mut ctx),
            Err(ProjectServiceError::Internal(_))
        ));
    }
}
