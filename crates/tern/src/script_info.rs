//
// script_info.rs
//
// Registry record of one source file: identity, text and project membership
//

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::ProjectServiceError;
use crate::host::{ServerHost, WatchId};
use crate::path::{CanonicalPath, NormalizedPath};
use crate::project::{ProjectId, ProjectKind};
use crate::text::{LineIndexSnapshot, LineOffset, TextSpan, TextStorage, TextVersion};

/// Language of a file, as far as the project system cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptKind {
    #[default]
    Unknown,
    Js,
    Jsx,
    Ts,
    Tsx,
    /// Supplied by an external project with content the engine cannot classify.
    External,
    Json,
    /// Kind decided later by a plugin.
    Deferred,
}

impl ScriptKind {
    pub fn from_file_name(file_name: &NormalizedPath) -> Self {
        let name = file_name.file_name().to_ascii_lowercase();
        if name.ends_with(".d.ts") || name.ends_with(".ts") || name.ends_with(".mts") || name.ends_with(".cts") {
            ScriptKind::Ts
        } else if name.ends_with(".tsx") {
            ScriptKind::Tsx
        } else if name.ends_with(".js") || name.ends_with(".mjs") || name.ends_with(".cjs") {
            ScriptKind::Js
        } else if name.ends_with(".jsx") {
            ScriptKind::Jsx
        } else if name.ends_with(".json") {
            ScriptKind::Json
        } else {
            ScriptKind::Unknown
        }
    }

    pub fn is_typescript(self) -> bool {
        matches!(self, ScriptKind::Ts | ScriptKind::Tsx)
    }

    pub fn is_javascript(self) -> bool {
        matches!(self, ScriptKind::Js | ScriptKind::Jsx)
    }
}

/// How a containing project relates to a file, used to pick a default project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectRole {
    pub kind: ProjectKind,
    /// The file is a root of a project this one references.
    pub is_redirect_source: bool,
}

/// Result of reading a file from disk into its text storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadOutcome {
    pub changed: bool,
    /// Size of a file that was too large to load.
    pub too_large: Option<u64>,
}

pub struct ScriptInfo {
    file_name: NormalizedPath,
    path: CanonicalPath,
    kind: ScriptKind,
    has_mixed_content: bool,
    text: TextStorage,
    containing_projects: Vec<ProjectId>,
    realpath: Option<NormalizedPath>,
    file_watcher: Option<WatchId>,
    mtime: Option<SystemTime>,
    deleted_on_disk: bool,
    default_configured_project: Option<ProjectId>,
}

impl ScriptInfo {
    pub fn new(
        file_name: NormalizedPath,
        path: CanonicalPath,
        kind: ScriptKind,
        has_mixed_content: bool,
        max_versions: usize,
    ) -> Self {
        let kind = if kind == ScriptKind::Unknown {
            ScriptKind::from_file_name(&file_name)
        } else {
            kind
        };
        Self {
            file_name,
            path,
            kind,
            has_mixed_content,
            text: TextStorage::new(max_versions),
            containing_projects: Vec::new(),
            realpath: None,
            file_watcher: None,
            mtime: None,
            deleted_on_disk: false,
            default_configured_project: None,
        }
    }

    pub fn file_name(&self) -> &NormalizedPath {
        &self.file_name
    }

    pub fn path(&self) -> &CanonicalPath {
        &self.path
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn has_mixed_content(&self) -> bool {
        self.has_mixed_content
    }

    pub fn is_dynamic(&self) -> bool {
        self.file_name.is_dynamic()
    }

    pub fn is_open(&self) -> bool {
        self.text.is_open()
    }

    pub fn realpath(&self) -> Option<&NormalizedPath> {
        self.realpath.as_ref()
    }

    pub fn set_realpath(&mut self, realpath: Option<NormalizedPath>) {
        self.realpath = realpath.filter(|real| real != &self.file_name);
    }

    pub fn file_watcher(&self) -> Option<WatchId> {
        self.file_watcher
    }

    pub fn set_file_watcher(&mut self, watcher: Option<WatchId>) -> Option<WatchId> {
        std::mem::replace(&mut self.file_watcher, watcher)
    }

    pub fn is_deleted_on_disk(&self) -> bool {
        self.deleted_on_disk
    }

    pub fn set_deleted_on_disk(&mut self, deleted: bool) {
        self.deleted_on_disk = deleted;
    }

    pub fn text_storage(&self) -> &TextStorage {
        &self.text
    }

    pub fn text(&self) -> Option<String> {
        self.text.text()
    }

    pub fn version(&self) -> TextVersion {
        self.text.version()
    }

    pub fn content_version(&self) -> u64 {
        self.text.content_version()
    }

    pub fn is_loaded(&self) -> bool {
        self.text.is_loaded()
    }

    pub fn snapshot(&self) -> LineIndexSnapshot {
        self.text.line_info()
    }

    // Open, close and edit. Each returns whether the content changed; the
    // owner marks the containing projects dirty.

    /// Mark the file open, optionally taking the client's content.
    pub fn open(&mut self, content: Option<String>) -> bool {
        self.text.set_open(true);
        self.deleted_on_disk = false;
        let changed = match content {
            Some(content) => self.text.reload(content),
            None => false,
        };
        self.text.switch_to_script_version_cache();
        changed
    }

    /// Close the file, choosing which content survives.
    ///
    /// Dynamic and mixed-content files are blanked. Files present on disk
    /// are reset to the disk content. Otherwise the text is left as is.
    pub fn close(&mut self, host: &dyn ServerHost, max_file_size: u64) -> ReloadOutcome {
        self.text.set_open(false);
        let outcome = if self.is_dynamic() || self.has_mixed_content {
            ReloadOutcome {
                changed: self.text.use_text(String::new()),
                too_large: None,
            }
        } else if host.file_exists(&self.file_name) {
            self.reload_from_disk(host, max_file_size)
        } else {
            ReloadOutcome::default()
        };
        self.text.switch_to_text();
        self.default_configured_project = None;
        outcome
    }

    /// Apply an edit given in char offsets.
    pub fn edit_content(&mut self, start: usize, end: usize, new_text: &str) {
        self.text.edit(start, end, new_text);
    }

    /// Replace the whole content, e.g. from a client "reload from temp file".
    pub fn reload(&mut self, content: String) -> bool {
        if self.is_open() {
            self.text.reload(content)
        } else {
            self.text.use_text(content)
        }
    }

    /// Read the file from disk. Files larger than `max_file_size` load as
    /// empty text.
    pub fn reload_from_disk(&mut self, host: &dyn ServerHost, max_file_size: u64) -> ReloadOutcome {
        let mtime = host.modified_time(&self.file_name);
        let size = host.file_size(&self.file_name);
        if let Some(size) = size.filter(|size| *size > max_file_size) {
            log::warn!(
                "Skipped loading contents of large file {} ({} bytes)",
                self.file_name,
                size
            );
            self.mtime = mtime;
            return ReloadOutcome {
                changed: self.text.reload(String::new()),
                too_large: Some(size),
            };
        }
        let content = match host.read_file(&self.file_name) {
            Ok(content) => {
                self.deleted_on_disk = false;
                content
            }
            Err(e) => {
                log::trace!("Could not read {}: {}", self.file_name, e);
                self.deleted_on_disk = true;
                String::new()
            }
        };
        self.mtime = mtime;
        ReloadOutcome {
            changed: self.text.reload(content),
            too_large: None,
        }
    }

    /// Load from disk unless the text is already present and current.
    pub fn ensure_loaded(&mut self, host: &dyn ServerHost, max_file_size: u64) -> ReloadOutcome {
        if self.is_open() || self.text.is_loaded() {
            return ReloadOutcome::default();
        }
        self.reload_from_disk(host, max_file_size)
    }

    /// React to a change notification for a closed file.
    ///
    /// Returns true when the on-disk content should be re-read. Change
    /// notifications with an unchanged mtime are ignored.
    pub fn mark_changed_on_disk(&mut self, host: &dyn ServerHost) -> bool {
        if self.is_open() {
            return false;
        }
        let mtime = host.modified_time(&self.file_name);
        if mtime.is_some() && mtime == self.mtime && self.text.is_loaded() {
            return false;
        }
        self.text.delay_reload_from_file_into_text();
        true
    }

    /// Drop the flat text of a closed file to save memory.
    ///
    /// Only text that can be re-read from disk is dropped.
    pub fn release_text(&mut self, host: &dyn ServerHost) -> bool {
        if self.is_open()
            || self.is_dynamic()
            || self.has_mixed_content
            || self.deleted_on_disk
            || !host.file_exists(&self.file_name)
        {
            return false;
        }
        self.text.release_text()
    }

    // Position conversions.

    pub fn position_to_line_offset(&self, position: usize) -> LineOffset {
        self.text.position_to_line_offset(position)
    }

    pub fn line_offset_to_position(&self, line: usize, offset: usize) -> usize {
        self.text.line_offset_to_position(line, offset)
    }

    pub fn line_span(&self, line: usize) -> TextSpan {
        self.text.line_span(line)
    }

    // Project membership.

    pub fn containing_projects(&self) -> &[ProjectId] {
        &self.containing_projects
    }

    pub fn is_attached(&self, project: ProjectId) -> bool {
        self.containing_projects.contains(&project)
    }

    /// Returns true if the edge was added.
    pub fn attach_to_project(&mut self, project: ProjectId) -> bool {
        if self.is_attached(project) {
            return false;
        }
        self.containing_projects.push(project);
        true
    }

    pub fn detach_from_project(&mut self, project: ProjectId) -> bool {
        let before = self.containing_projects.len();
        self.containing_projects.retain(|p| *p != project);
        if self.default_configured_project == Some(project) {
            self.default_configured_project = None;
        }
        self.containing_projects.len() != before
    }

    /// Remove every edge, returning the projects that were attached.
    pub fn detach_all_projects(&mut self) -> Vec<ProjectId> {
        self.default_configured_project = None;
        std::mem::take(&mut self.containing_projects)
    }

    /// True when no non-background project contains the file.
    pub fn is_orphan(&self, is_background: impl Fn(ProjectId) -> bool) -> bool {
        self.containing_projects.iter().all(|p| is_background(*p))
    }

    pub fn default_configured_project(&self) -> Option<ProjectId> {
        self.default_configured_project
    }

    pub fn set_default_configured_project(&mut self, project: Option<ProjectId>) {
        self.default_configured_project = project;
    }

    /// Pick the project that answers requests for this file.
    ///
    /// Precedence: the remembered default configured project, the first
    /// configured project that is not a redirect source, the first
    /// configured project, the first external project, the first inferred
    /// project. Background projects never qualify.
    pub fn default_project(
        &self,
        role_of: impl Fn(ProjectId) -> Option<ProjectRole>,
    ) -> Result<ProjectId, ProjectServiceError> {
        let mut first_configured = None;
        let mut first_non_redirect = None;
        let mut first_external = None;
        let mut first_inferred = None;

        for &project in &self.containing_projects {
            let Some(role) = role_of(project) else {
                continue;
            };
            match role.kind {
                ProjectKind::Configured => {
                    if self.default_configured_project == Some(project) {
                        return Ok(project);
                    }
                    if !role.is_redirect_source && first_non_redirect.is_none() {
                        first_non_redirect = Some(project);
                    }
                    first_configured.get_or_insert(project);
                }
                ProjectKind::External => {
                    first_external.get_or_insert(project);
                }
                ProjectKind::Inferred => {
                    first_inferred.get_or_insert(project);
                }
                ProjectKind::AutoImportProvider | ProjectKind::Auxiliary => {}
            }
        }

        first_non_redirect
            .or(first_configured)
            .or(first_external)
            .or(first_inferred)
            .ok_or_else(|| ProjectServiceError::NoProject(self.file_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryHost;

    fn info(name: &str) -> ScriptInfo {
        let file = NormalizedPath::from_absolute(name);
        let path = file.to_canonical(true);
        ScriptInfo::new(file, path, ScriptKind::Unknown, false, 8)
    }

    fn roles(id: ProjectId) -> Option<ProjectRole> {
        let kind = match id.0 {
            1 => ProjectKind::Inferred,
            2 => ProjectKind::Configured,
            3 => ProjectKind::External,
            4 => ProjectKind::AutoImportProvider,
            5 => ProjectKind::Configured,
            _ => return None,
        };
        Some(ProjectRole {
            kind,
            is_redirect_source: id.0 == 5,
        })
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(info("/p/a.ts").kind(), ScriptKind::Ts);
        assert_eq!(info("/p/a.d.ts").kind(), ScriptKind::Ts);
        assert_eq!(info("/p/a.tsx").kind(), ScriptKind::Tsx);
        assert_eq!(info("/p/a.js").kind(), ScriptKind::Js);
        assert_eq!(info("/p/a.json").kind(), ScriptKind::Json);
        assert_eq!(info("/p/a.vue").kind(), ScriptKind::Unknown);
    }

    #[test]
    fn test_configured_wins_regardless_of_attach_order() {
        let mut a = info("/p/a.ts");
        a.attach_to_project(ProjectId(1));
        a.attach_to_project(ProjectId(2));
        assert_eq!(a.default_project(roles), Ok(ProjectId(2)));

        let mut b = info("/p/b.ts");
        b.attach_to_project(ProjectId(2));
        b.attach_to_project(ProjectId(1));
        assert_eq!(b.default_project(roles), Ok(ProjectId(2)));
    }

    #[test]
    fn test_redirect_source_loses_to_plain_configured() {
        let mut a = info("/p/a.ts");
        a.attach_to_project(ProjectId(5));
        a.attach_to_project(ProjectId(2));
        assert_eq!(a.default_project(roles), Ok(ProjectId(2)));

        let mut only_redirect = info("/p/c.ts");
        only_redirect.attach_to_project(ProjectId(5));
        assert_eq!(only_redirect.default_project(roles), Ok(ProjectId(5)));
    }

    #[test]
    fn test_remembered_default_configured_project_wins() {
        let mut a = info("/p/a.ts");
        a.attach_to_project(ProjectId(2));
        a.attach_to_project(ProjectId(5));
        a.set_default_configured_project(Some(ProjectId(5)));
        assert_eq!(a.default_project(roles), Ok(ProjectId(5)));
    }

    #[test]
    fn test_external_before_inferred_and_background_never_default() {
        let mut a = info("/p/a.ts");
        a.attach_to_project(ProjectId(1));
        a.attach_to_project(ProjectId(3));
        assert_eq!(a.default_project(roles), Ok(ProjectId(3)));

        let mut orphan = info("/p/b.ts");
        orphan.attach_to_project(ProjectId(4));
        assert!(orphan.is_orphan(|p| p.0 == 4));
        assert!(matches!(
            orphan.default_project(roles),
            Err(ProjectServiceError::NoProject(_))
        ));
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut a = info("/p/a.ts");
        assert!(a.attach_to_project(ProjectId(1)));
        assert!(!a.attach_to_project(ProjectId(1)));
        assert_eq!(a.containing_projects(), &[ProjectId(1)]);
        assert!(a.detach_from_project(ProjectId(1)));
        assert!(a.containing_projects().is_empty());
    }

    #[test]
    fn test_close_resets_to_disk_content() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "disk");
        let mut a = info("/p/a.ts");
        assert!(a.open(Some("edited".to_string())));
        let outcome = a.close(&host, u64::MAX);
        assert!(outcome.changed);
        assert_eq!(a.text().as_deref(), Some("disk"));
        assert!(!a.is_open());
    }

    #[test]
    fn test_close_matching_disk_is_not_a_change() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "same");
        let mut a = info("/p/a.ts");
        a.open(Some("same".to_string()));
        assert!(!a.close(&host, u64::MAX).changed);
    }

    #[test]
    fn test_close_dynamic_file_blanks_text() {
        let host = MemoryHost::new();
        let file = NormalizedPath::new("^/untitled/ts-nul-authority/Untitled-1", "/");
        let path = file.to_canonical(true);
        let mut a = ScriptInfo::new(file, path, ScriptKind::Ts, false, 8);
        a.open(Some("let x = 1;".to_string()));
        assert!(a.close(&host, u64::MAX).changed);
        assert_eq!(a.text().as_deref(), Some(""));
    }

    #[test]
    fn test_close_without_disk_file_leaves_text() {
        let host = MemoryHost::new();
        let mut a = info("/p/new.ts");
        a.open(Some("unsaved".to_string()));
        assert!(!a.close(&host, u64::MAX).changed);
        assert_eq!(a.text().as_deref(), Some("unsaved"));
    }

    #[test]
    fn test_large_file_loads_as_empty() {
        let host = MemoryHost::new();
        host.add_file("/p/big.js", &"x".repeat(64));
        let mut a = info("/p/big.js");
        let outcome = a.ensure_loaded(&host, 16);
        assert_eq!(outcome.too_large, Some(64));
        assert_eq!(a.text().as_deref(), Some(""));
    }

    #[test]
    fn test_release_text_keeps_content_not_on_disk() {
        let host = MemoryHost::new();
        let mut unsaved = info("/p/new.ts");
        unsaved.open(Some("unsaved".to_string()));
        unsaved.close(&host, u64::MAX);
        assert!(!unsaved.release_text(&host));
        assert_eq!(unsaved.text().as_deref(), Some("unsaved"));

        host.add_file("/p/page.html", "<html></html>");
        let file = NormalizedPath::from_absolute("/p/page.html");
        let path = file.to_canonical(true);
        let mut mixed = ScriptInfo::new(file, path, ScriptKind::Js, true, 8);
        mixed.open(Some("let y = 2;".to_string()));
        mixed.close(&host, u64::MAX);
        mixed.reload("let y = 3;".to_string());
        assert!(!mixed.release_text(&host));
        assert_eq!(mixed.text().as_deref(), Some("let y = 3;"));

        let file = NormalizedPath::new("^/untitled/ts-nul-authority/Untitled-2", "/");
        let path = file.to_canonical(true);
        let mut dynamic = ScriptInfo::new(file, path, ScriptKind::Ts, false, 8);
        dynamic.reload("let z = 4;".to_string());
        assert!(!dynamic.release_text(&host));
        assert_eq!(dynamic.text().as_deref(), Some("let z = 4;"));
    }

    #[test]
    fn test_released_text_is_read_back_from_disk() {
        let host = MemoryHost::new();
        host.add_file("/p/a.ts", "disk");
        let mut a = info("/p/a.ts");
        a.ensure_loaded(&host, u64::MAX);
        assert!(a.release_text(&host));
        assert_eq!(a.text(), None);

        let outcome = a.ensure_loaded(&host, u64::MAX);
        assert!(!outcome.changed);
        assert_eq!(a.text().as_deref(), Some("disk"));
    }

    #[test]
    fn test_edit_then_position_conversion() {
        let mut a = info("/p/a.ts");
        a.open(Some("ab\ncd".to_string()));
        a.edit_content(3, 3, "x");
        assert_eq!(a.text().as_deref(), Some("ab\nxcd"));
        assert_eq!(a.position_to_line_offset(4), LineOffset::new(2, 2));
        assert_eq!(a.line_offset_to_position(2, 2), 4);
    }
}
