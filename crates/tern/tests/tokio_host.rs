//! Integration tests for the file-system host and the service running on it.
//!
//! Timer tests run on a paused tokio clock, so they are deterministic; the
//! watcher test waits on real file-system notifications.
//!
//! Run with: `cargo test -p tern --test tokio_host`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tern::config::ProjectServiceConfig;
use tern::host::{HostEvent, ServerHost, TokioHost, WatchEventKind};
use tern::path::NormalizedPath;
use tern::project::ProjectKind;
use tern::script_info::ScriptKind;
use tern::service::ProjectService;

// ============================================================================
// Test Helpers
// ============================================================================

fn temp_root() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn normalized(path: &std::path::Path) -> NormalizedPath {
    NormalizedPath::from_absolute(&path.to_string_lossy())
}

// ============================================================================
// File access
// ============================================================================

#[tokio::test]
async fn test_reads_writes_and_lists_files() {
    let (_dir, root) = temp_root();
    std::fs::create_dir(root.join("src")).unwrap();
    let (host, _events) = TokioHost::new().unwrap();

    let file = normalized(&root.join("src/a.ts"));
    assert!(!host.file_exists(&file));
    assert!(host.read_file(&file).is_err());

    host.write_file(&file, "export const a = 1;\n").unwrap();
    assert!(host.file_exists(&file));
    assert!(!host.directory_exists(&file));
    assert_eq!(host.read_file(&file).unwrap(), "export const a = 1;\n");
    assert_eq!(host.file_size(&file), Some(20));
    assert!(host.modified_time(&file).is_some());

    let entries = host.directory_entries(&normalized(&root));
    assert_eq!(entries.directories, vec!["src".to_string()]);
    assert!(entries.files.is_empty());
    let entries = host.directory_entries(&normalized(&root.join("src")));
    assert_eq!(entries.files, vec!["a.ts".to_string()]);
}

#[tokio::test]
async fn test_missing_directory_has_no_entries() {
    let (_dir, root) = temp_root();
    let (host, _events) = TokioHost::new().unwrap();
    let missing = normalized(&root.join("nope"));
    assert!(!host.directory_exists(&missing));
    assert_eq!(host.directory_entries(&missing), Default::default());
    assert_eq!(host.realpath(&missing), missing);
}

// ============================================================================
// Timers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timer_fires_after_delay() {
    let (host, mut events) = TokioHost::new().unwrap();
    let start = tokio::time::Instant::now();
    let id = host.set_timeout(Duration::from_millis(250));

    assert_eq!(events.recv().await, Some(HostEvent::Timer(id)));
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_cleared_timer_never_fires() {
    let (host, mut events) = TokioHost::new().unwrap();
    let cleared = host.set_timeout(Duration::from_millis(100));
    let kept = host.set_timeout(Duration::from_millis(200));
    host.clear_timeout(cleared);

    assert_eq!(events.recv().await, Some(HostEvent::Timer(kept)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_clearing_fired_timer_is_harmless() {
    let (host, mut events) = TokioHost::new().unwrap();
    let id = host.set_timeout(Duration::from_millis(10));
    assert_eq!(events.recv().await, Some(HostEvent::Timer(id)));
    host.clear_timeout(id);
    host.clear_timeout(id);
}

// ============================================================================
// Watchers
// ============================================================================

#[tokio::test]
async fn test_directory_watcher_reports_created_file() {
    let (_dir, root) = temp_root();
    let (host, mut events) = TokioHost::new().unwrap();
    let watch = host.watch_directory(&normalized(&root), false);

    let created = root.join("b.ts");
    std::fs::write(&created, "export {};\n").unwrap();
    let expected = normalized(&created);

    let seen = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            if let HostEvent::Watch(event) = event {
                if event.id == watch && event.path == expected {
                    return event.kind;
                }
            }
        }
        panic!("host event channel closed");
    })
    .await
    .expect("no watch event for the created file");
    assert!(matches!(seen, WatchEventKind::Created | WatchEventKind::Changed));
    host.close_watcher(watch);
}

// ============================================================================
// Project service on disk
// ============================================================================

#[tokio::test]
async fn test_service_opens_file_in_configured_project_on_disk() {
    let (_dir, root) = temp_root();
    std::fs::write(root.join("tsconfig.json"), r#"{ "include": ["src"] }"#).unwrap();
    std::fs::create_dir(root.join("src")).unwrap();
    std::fs::write(root.join("src/a.ts"), "import { b } from './b';\n").unwrap();
    std::fs::write(root.join("src/b.ts"), "export const b = 1;\n").unwrap();

    let (host, _events) = TokioHost::new().unwrap();
    let host = host.with_current_directory(normalized(&root));
    let mut service = ProjectService::new(Arc::new(host), ProjectServiceConfig::default());

    let file = NormalizedPath::from_absolute(&root.join("src/a.ts").to_string_lossy());
    let result = service
        .open_client_file(&file, None, ScriptKind::Unknown, None)
        .unwrap();
    assert_eq!(result.configured_project, Some(normalized(&root.join("tsconfig.json"))));

    let id = service.get_default_project_for_file(&file, false).unwrap();
    let project = service.project(id).unwrap();
    assert_eq!(project.kind(), ProjectKind::Configured);
    let b = normalized(&root.join("src/b.ts")).to_canonical(true);
    assert!(project.contains_file(&b));

    service.close_client_file(&file).unwrap();
    assert_eq!(service.projects().count(), 0);
}
