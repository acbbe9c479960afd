//
// service/integration_tests.rs
//
// End-to-end scenarios over an in-memory host with a virtual clock
//

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::config::ProjectServiceConfig;
use crate::events::ProjectServiceEvent;
use crate::host::HostEvent;
use crate::path::NormalizedPath;
use crate::project::ProjectKind;
use crate::script_info::ScriptKind;
use crate::test_utils::MemoryHost;
use crate::text::LineOffset;

struct Fixture {
    host: Arc<MemoryHost>,
    service: ProjectService,
    events: Arc<Mutex<Vec<ProjectServiceEvent>>>,
}

fn fixture(files: &[(&str, &str)]) -> Fixture {
    fixture_with(files, ProjectServiceConfig::default())
}

fn fixture_with(files: &[(&str, &str)], config: ProjectServiceConfig) -> Fixture {
    let host = Arc::new(MemoryHost::with_current_directory("/p"));
    for (path, content) in files {
        host.add_file(path, content);
    }
    host.take_events();
    let mut service = ProjectService::new(host.clone(), config);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    service.set_event_handler(Box::new(move |event| sink.lock().unwrap().push(event)));
    Fixture { host, service, events }
}

fn path(p: &str) -> NormalizedPath {
    NormalizedPath::from_absolute(p)
}

impl Fixture {
    fn open(&mut self, file: &str) -> OpenFileResult {
        self.service
            .open_client_file(&path(file), None, ScriptKind::Unknown, None)
            .unwrap()
    }

    fn close(&mut self, file: &str) {
        self.service.close_client_file(&path(file)).unwrap();
    }

    /// Deliver queued watch events.
    fn pump(&mut self) {
        for event in self.host.take_events() {
            match event {
                HostEvent::Watch(event) => self.service.on_watch_event(event),
                HostEvent::Timer(timer) => {
                    self.service.on_timer(timer);
                }
            }
        }
    }

    /// Deliver watch events, then move the clock and fire due timers.
    fn advance(&mut self, ms: u64) -> usize {
        self.pump();
        let fired = self.host.advance(Duration::from_millis(ms));
        let count = fired.len();
        for timer in fired {
            self.service.on_timer(timer);
        }
        self.pump();
        count
    }

    fn default_project(&mut self, file: &str) -> &Project {
        let id = self.service.get_default_project_for_file(&path(file), false).unwrap();
        self.service.project(id).unwrap()
    }

    fn contains(&self, id: ProjectId, file: &str) -> bool {
        let key = path(file).to_canonical(true);
        self.service.project(id).is_some_and(|p| p.contains_file(&key))
    }

    fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(ProjectServiceEvent::name).collect()
    }
}

#[test]
fn test_orphan_js_file_gets_inferred_project() {
    let mut f = fixture(&[
        ("/p/a.js", "import { b } from './b';\nb();\n"),
        ("/p/b.js", "export function b() {}\n"),
    ]);
    let result = f.open("/p/a.js");
    assert_eq!(result.configured_project, None);

    let project = f.default_project("/p/a.js");
    assert_eq!(project.kind(), ProjectKind::Inferred);
    assert_eq!(project.name(), "/dev/null/inferredProject1*");
    assert!(project.options().allow_js());
    let id = project.id();
    assert!(f.contains(id, "/p/b.js"));
}

#[test]
fn test_edit_marks_project_dirty_until_updated() {
    let mut f = fixture(&[("/p/a.ts", "let x = 1;\n")]);
    f.open("/p/a.ts");
    let id = f.service.get_default_project_for_file(&path("/p/a.ts"), false).unwrap();
    assert!(!f.service.project(id).unwrap().is_dirty());

    let edit = TextEdit {
        start: LineOffset { line: 1, offset: 9 },
        end: LineOffset { line: 1, offset: 10 },
        new_text: "2".to_string(),
    };
    f.service.change_open_file(&path("/p/a.ts"), &[edit]).unwrap();
    assert!(f.service.project(id).unwrap().is_dirty());
    assert_eq!(
        f.service.script_info(&path("/p/a.ts")).unwrap().text().as_deref(),
        Some("let x = 2;\n")
    );

    let version = f.service.project(id).unwrap().program_version();
    f.service.update_project_graph(id).unwrap();
    let project = f.service.project(id).unwrap();
    assert!(!project.is_dirty());
    assert!(project.program_version() > version);
}

#[test]
fn test_batch_edits_apply_against_original_text() {
    let mut f = fixture(&[("/p/a.ts", "abc\n")]);
    f.open("/p/a.ts");
    let edits = [
        TextEdit {
            start: LineOffset { line: 1, offset: 1 },
            end: LineOffset { line: 1, offset: 2 },
            new_text: "XX".to_string(),
        },
        TextEdit {
            start: LineOffset { line: 1, offset: 3 },
            end: LineOffset { line: 1, offset: 4 },
            new_text: "Y".to_string(),
        },
    ];
    f.service.change_open_file(&path("/p/a.ts"), &edits).unwrap();
    assert_eq!(
        f.service.script_info(&path("/p/a.ts")).unwrap().text().as_deref(),
        Some("XXbY\n")
    );
}

#[test]
fn test_change_of_closed_file_is_rejected() {
    let mut f = fixture(&[("/p/a.ts", "")]);
    let err = f.service.change_open_file(&path("/p/a.ts"), &[]).unwrap_err();
    assert!(matches!(err, crate::error::ProjectServiceError::ScriptInfoNotFound(_)));
    assert!(matches!(
        f.service.close_client_file(&path("/p/a.ts")),
        Err(crate::error::ProjectServiceError::FileNotOpen(_))
    ));
}

#[test]
fn test_closing_last_file_releases_everything() {
    let mut f = fixture(&[
        ("/p/a.js", "import './b';\n"),
        ("/p/b.js", "export {};\n"),
    ]);
    f.open("/p/a.js");
    assert!(f.host.watcher_count() > 0);

    f.close("/p/a.js");
    assert_eq!(f.service.projects().count(), 0);
    assert!(f.service.inferred_projects().is_empty());
    assert_eq!(f.service.script_infos().len(), 0);
    assert!(f.service.config_files().is_empty());
    assert_eq!(f.host.watcher_count(), 0);
}

#[test]
fn test_collected_text_is_read_back_on_next_update() {
    let mut f = fixture(&[
        ("/p/a.js", "import './b';\n"),
        ("/p/b.js", "export {};\n"),
    ]);
    f.open("/p/a.js");
    let id = f.service.get_default_project_for_file(&path("/p/a.js"), false).unwrap();
    let version = f.service.script_info(&path("/p/b.js")).unwrap().content_version();

    f.advance(7_000);
    assert_eq!(f.service.script_info(&path("/p/b.js")).unwrap().text(), None);
    assert!(f.service.script_info(&path("/p/a.js")).unwrap().text().is_some());

    let edit = TextEdit {
        start: LineOffset { line: 2, offset: 1 },
        end: LineOffset { line: 2, offset: 1 },
        new_text: "let y;\n".to_string(),
    };
    f.service.change_open_file(&path("/p/a.js"), &[edit]).unwrap();
    f.service.update_project_graph(id).unwrap();

    let b = f.service.script_info(&path("/p/b.js")).unwrap();
    assert_eq!(b.text().as_deref(), Some("export {};\n"));
    assert_eq!(b.content_version(), version);
    assert!(f.contains(id, "/p/b.js"));
}

#[test]
fn test_file_outside_files_list_goes_to_inferred_project() {
    let mut f = fixture(&[
        ("/p/tsconfig.json", r#"{ "files": ["a.ts"] }"#),
        ("/p/a.ts", "export const a = 1;\n"),
        ("/p/b.ts", "export const b = 1;\n"),
    ]);
    let result = f.open("/p/a.ts");
    assert_eq!(result.configured_project, Some(path("/p/tsconfig.json")));
    let configured = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    assert!(f.contains(configured, "/p/a.ts"));

    let result = f.open("/p/b.ts");
    assert_eq!(result.configured_project, Some(path("/p/tsconfig.json")));
    assert!(!f.contains(configured, "/p/b.ts"));
    let project = f.default_project("/p/b.ts");
    assert_eq!(project.kind(), ProjectKind::Inferred);
    assert_eq!(f.default_project("/p/a.ts").id(), configured);
}

#[test]
fn test_checked_config_location_is_shared() {
    let mut f = fixture(&[("/p/x/a.ts", ""), ("/p/y/b.ts", "")]);
    f.open("/p/x/a.ts");
    f.open("/p/y/b.ts");

    let key = path("/p/tsconfig.json").to_canonical(true);
    let entry = f.service.config_files().get(&key).unwrap();
    assert!(!entry.exists());
    assert_eq!(entry.open_files_impacted().count(), 2);
    let watchers = f
        .host
        .watched_paths()
        .into_iter()
        .filter(|(p, _)| p == "/p/tsconfig.json")
        .count();
    assert_eq!(watchers, 1);

    f.close("/p/x/a.ts");
    assert!(f.service.config_files().get(&key).is_some());
    f.close("/p/y/b.ts");
    assert!(f.service.config_files().is_empty());
}

#[test]
fn test_configured_project_is_default_over_inferred() {
    let mut f = fixture(&[
        ("/p/tsconfig.json", "{}"),
        ("/p/src/a.ts", "import { b } from './b';\n"),
        ("/p/src/b.ts", "export const b = 1;\n"),
    ]);
    let result = f.open("/p/src/a.ts");
    assert_eq!(result.configured_project, Some(path("/p/tsconfig.json")));
    assert!(result.config_file_errors.is_empty());
    let project = f.default_project("/p/src/a.ts");
    assert_eq!(project.kind(), ProjectKind::Configured);
    assert!(f.service.inferred_projects().is_empty());
    assert_eq!(
        f.event_names(),
        vec!["projectLoadingStart", "projectLoadingFinish", "configFileDiag"]
    );
}

#[test]
fn test_created_config_adopts_open_file() {
    let mut f = fixture(&[("/p/a.ts", "export const a = 1;\n")]);
    f.open("/p/a.ts");
    assert_eq!(f.default_project("/p/a.ts").kind(), ProjectKind::Inferred);

    f.host.add_file("/p/tsconfig.json", "{}");
    f.pump();
    // Reassignment waits for the quiet period.
    assert_eq!(f.default_project("/p/a.ts").kind(), ProjectKind::Inferred);
    f.advance(2499);
    assert_eq!(f.default_project("/p/a.ts").kind(), ProjectKind::Inferred);

    f.advance(1);
    let project = f.default_project("/p/a.ts");
    assert_eq!(project.kind(), ProjectKind::Configured);
    assert_eq!(project.name(), "/p/tsconfig.json");
    assert!(f.service.inferred_projects().is_empty());
    assert!(f.event_names().contains(&"projectsUpdatedInBackground"));
}

#[test]
fn test_deleted_config_returns_file_to_inferred_project() {
    let mut f = fixture(&[("/p/tsconfig.json", "{}"), ("/p/a.ts", "")]);
    f.open("/p/a.ts");
    assert!(f.service.configured_project(&path("/p/tsconfig.json")).is_some());

    f.host.delete_file("/p/tsconfig.json");
    f.pump();
    assert!(f.service.configured_project(&path("/p/tsconfig.json")).is_none());

    let project = f.service.get_default_project_for_file(&path("/p/a.ts"), true).unwrap();
    assert_eq!(f.service.project(project).unwrap().kind(), ProjectKind::Inferred);
}

#[test]
fn test_wildcard_directory_tracks_added_and_deleted_files() {
    let mut f = fixture(&[("/p/tsconfig.json", "{}"), ("/p/a.ts", "")]);
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();

    f.host.add_file("/p/c.ts", "export {};\n");
    f.advance(249);
    assert!(!f.contains(id, "/p/c.ts"));
    f.advance(1);
    assert!(f.contains(id, "/p/c.ts"));

    f.host.delete_file("/p/c.ts");
    f.advance(250);
    assert!(!f.contains(id, "/p/c.ts"));
    assert!(f.service.script_info(&path("/p/c.ts")).is_none());
}

#[test]
fn test_ignored_extension_does_not_schedule_update() {
    let mut f = fixture(&[("/p/tsconfig.json", "{}"), ("/p/a.ts", "")]);
    f.open("/p/a.ts");
    f.host.add_file("/p/notes.md", "# notes\n");
    f.pump();
    assert!(!f.service.has_pending_work());
}

#[test]
fn test_config_edit_reloads_file_list() {
    let mut f = fixture(&[
        ("/p/tsconfig.json", "{}"),
        ("/p/a.ts", ""),
        ("/p/b.ts", ""),
    ]);
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    assert!(f.contains(id, "/p/b.ts"));

    f.host.add_file("/p/tsconfig.json", r#"{ "files": ["a.ts"] }"#);
    f.advance(250);
    assert!(!f.contains(id, "/p/b.ts"));
    assert!(f.contains(id, "/p/a.ts"));
}

#[test]
fn test_oversized_js_project_disables_language_service() {
    let config = ProjectServiceConfig {
        max_non_ts_project_size: 16,
        ..ProjectServiceConfig::default()
    };
    let mut f = fixture_with(
        &[
            ("/p/tsconfig.json", r#"{ "compilerOptions": { "allowJs": true } }"#),
            ("/p/a.ts", ""),
            ("/p/big.js", "// a file well past the sixteen byte limit\n"),
        ],
        config,
    );
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    assert!(!f.service.project(id).unwrap().language_service_enabled());

    let events = f.events.lock().unwrap();
    let state = events
        .iter()
        .find_map(|event| match event {
            ProjectServiceEvent::ProjectLanguageServiceState {
                language_service_enabled,
                last_file_exceeding_size_limit,
                ..
            } => Some((*language_service_enabled, last_file_exceeding_size_limit.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(state, (false, Some(path("/p/big.js"))));
}

#[test]
fn test_external_project_holds_configured_project() {
    let mut f = fixture(&[("/p/tsconfig.json", "{}"), ("/p/a.ts", "")]);
    f.service.open_external_project(ExternalProjectRequest {
        project_file_name: "/p/app.csproj".to_string(),
        root_files: vec![ExternalFile {
            file_name: "/p/tsconfig.json".to_string(),
            has_mixed_content: false,
        }],
        options: Default::default(),
    });
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    // Loaded lazily by the debounced update.
    assert!(!f.contains(id, "/p/a.ts"));
    f.advance(250);
    assert!(f.contains(id, "/p/a.ts"));

    f.advance(2500);
    assert_eq!(f.service.configured_project(&path("/p/tsconfig.json")), Some(id));
    assert_eq!(f.service.external_project_names(), vec!["/p/app.csproj".to_string()]);

    f.service.close_external_project("/p/app.csproj");
    assert!(f.service.configured_project(&path("/p/tsconfig.json")).is_none());
    assert!(f.service.external_project_names().is_empty());
}

#[test]
fn test_plain_external_project_owns_open_file() {
    let mut f = fixture(&[("/p/a.ts", ""), ("/p/b.ts", "")]);
    f.service.open_external_project(ExternalProjectRequest {
        project_file_name: "/p/app.csproj".to_string(),
        root_files: vec![
            ExternalFile {
                file_name: "a.ts".to_string(),
                has_mixed_content: false,
            },
            ExternalFile {
                file_name: "b.ts".to_string(),
                has_mixed_content: false,
            },
        ],
        options: Default::default(),
    });
    let id = f.service.external_project("/p/app.csproj").unwrap();
    assert!(f.contains(id, "/p/b.ts"));

    f.open("/p/a.ts");
    assert_eq!(f.default_project("/p/a.ts").id(), id);
    assert!(f.service.inferred_projects().is_empty());

    f.service.open_external_projects(Vec::new());
    assert!(f.service.external_project("/p/app.csproj").is_none());
    assert_eq!(f.default_project("/p/a.ts").kind(), ProjectKind::Inferred);
}

#[test]
fn test_repeated_update_requests_collapse_into_one() {
    let mut f = fixture(&[("/p/tsconfig.json", "{}"), ("/p/a.ts", "")]);
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    let before = f.host.pending_timer_count();
    for _ in 0..3 {
        f.service.delay_update_project_graph(id);
    }
    assert_eq!(f.host.pending_timer_count(), before + 1);
    assert!(f.service.project(id).unwrap().is_dirty());

    assert_eq!(f.advance(250), 1);
    assert!(!f.service.project(id).unwrap().is_dirty());
}

#[test]
fn test_inferred_options_apply_to_existing_projects() {
    let mut f = fixture(&[("/p/a.ts", "")]);
    f.open("/p/a.ts");
    let options = crate::config_file::CompilerOptions {
        allow_js: Some(false),
        ..Default::default()
    };
    f.service.set_compiler_options_for_inferred_projects(&options, None);
    let project = f.default_project("/p/a.ts");
    assert!(!project.options().allow_js());
    assert!(project.is_dirty());
}

#[test]
fn test_reload_projects_rereads_configs() {
    let mut f = fixture(&[("/p/tsconfig.json", "{}"), ("/p/a.ts", ""), ("/p/b.ts", "")]);
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();

    // Change the config without delivering the watch event.
    f.host.add_file("/p/tsconfig.json", r#"{ "files": ["a.ts"] }"#);
    f.host.take_events();
    f.service.reload_projects();
    f.service.update_project_graph(id).unwrap();
    assert!(!f.contains(id, "/p/b.ts"));
}

#[test]
fn test_auto_import_provider_follows_host_project() {
    let config = ProjectServiceConfig {
        include_package_json_auto_imports: true,
        ..ProjectServiceConfig::default()
    };
    let mut f = fixture_with(
        &[
            ("/p/tsconfig.json", "{}"),
            ("/p/a.ts", ""),
            ("/p/package.json", r#"{ "dependencies": { "alpha": "1" } }"#),
            ("/p/node_modules/alpha/package.json", r#"{ "types": "index.d.ts" }"#),
            ("/p/node_modules/alpha/index.d.ts", "export declare const alpha: number;\n"),
        ],
        config,
    );
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    let provider = f.service.project(id).unwrap().auto_import_provider().unwrap();
    let project = f.service.project(provider).unwrap();
    assert_eq!(project.kind(), ProjectKind::AutoImportProvider);
    assert_eq!(project.name(), "/dev/null/autoImportProviderProject1*");
    assert!(f.contains(provider, "/p/node_modules/alpha/index.d.ts"));
    assert!(!f.contains(id, "/p/node_modules/alpha/index.d.ts"));
    assert_eq!(f.default_project("/p/a.ts").id(), id);

    f.close("/p/a.ts");
    assert_eq!(f.service.projects().count(), 0);
}

#[test]
fn test_auto_import_provider_is_off_by_default() {
    let mut f = fixture(&[
        ("/p/tsconfig.json", "{}"),
        ("/p/a.ts", ""),
        ("/p/package.json", r#"{ "dependencies": { "alpha": "1" } }"#),
        ("/p/node_modules/alpha/index.d.ts", ""),
    ]);
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    assert_eq!(f.service.project(id).unwrap().auto_import_provider(), None);
    assert_eq!(f.service.projects().count(), 1);
}

#[test]
fn test_auxiliary_project_closes_with_its_host() {
    let mut f = fixture(&[
        ("/p/tsconfig.json", r#"{ "files": ["a.ts"] }"#),
        ("/p/a.ts", ""),
        ("/p/lib/impl.ts", "export const x = 1;\n"),
    ]);
    f.open("/p/a.ts");
    let id = f.service.configured_project(&path("/p/tsconfig.json")).unwrap();
    let aux = f
        .service
        .create_auxiliary_project(id, vec![path("/p/lib/impl.ts")])
        .unwrap();
    let project = f.service.project(aux).unwrap();
    assert_eq!(project.kind(), ProjectKind::Auxiliary);
    assert_eq!(project.name(), "/dev/null/auxiliaryProject1*");
    assert!(f.contains(aux, "/p/lib/impl.ts"));
    assert_eq!(f.default_project("/p/a.ts").id(), id);

    assert!(matches!(
        f.service.create_auxiliary_project(ProjectId(999), Vec::new()),
        Err(crate::error::ProjectServiceError::ProjectNotFound(_))
    ));

    f.close("/p/a.ts");
    assert!(f.service.project(aux).is_none());
    assert!(f.service.script_info(&path("/p/lib/impl.ts")).is_none());
}
