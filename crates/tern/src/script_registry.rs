//
// script_registry.rs
//
// Canonical path -> ScriptInfo map owned by the project service
//

use indexmap::IndexMap;

use crate::path::{CanonicalPath, NormalizedPath};
use crate::script_info::{ScriptInfo, ScriptKind};

/// Single source of truth for script infos.
///
/// Get-or-create is idempotent: a canonical path maps to at most one info
/// for the lifetime of the entry.
pub struct ScriptRegistry {
    infos: IndexMap<CanonicalPath, ScriptInfo>,
    case_sensitive: bool,
    max_versions: usize,
}

impl ScriptRegistry {
    pub fn new(case_sensitive: bool, max_versions: usize) -> Self {
        Self {
            infos: IndexMap::new(),
            case_sensitive,
            max_versions,
        }
    }

    pub fn canonical(&self, file_name: &NormalizedPath) -> CanonicalPath {
        file_name.to_canonical(self.case_sensitive)
    }

    pub fn get(&self, path: &CanonicalPath) -> Option<&ScriptInfo> {
        self.infos.get(path)
    }

    pub fn get_mut(&mut self, path: &CanonicalPath) -> Option<&mut ScriptInfo> {
        self.infos.get_mut(path)
    }

    pub fn get_by_name(&self, file_name: &NormalizedPath) -> Option<&ScriptInfo> {
        self.infos.get(&self.canonical(file_name))
    }

    pub fn contains(&self, path: &CanonicalPath) -> bool {
        self.infos.contains_key(path)
    }

    /// Return the info for `file_name`, creating an empty closed one when
    /// none exists. The boolean is true when the entry was created.
    pub fn get_or_create(
        &mut self,
        file_name: &NormalizedPath,
        kind: ScriptKind,
        has_mixed_content: bool,
    ) -> (&mut ScriptInfo, bool) {
        let path = self.canonical(file_name);
        let max_versions = self.max_versions;
        let mut created = false;
        let info = self.infos.entry(path.clone()).or_insert_with(|| {
            created = true;
            log::trace!("Creating script info for {}", file_name);
            ScriptInfo::new(file_name.clone(), path, kind, has_mixed_content, max_versions)
        });
        (info, created)
    }

    pub fn remove(&mut self, path: &CanonicalPath) -> Option<ScriptInfo> {
        let removed = self.infos.shift_remove(path);
        if removed.is_some() {
            log::trace!("Removed script info {}", path);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalPath, &ScriptInfo)> {
        self.infos.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&CanonicalPath, &mut ScriptInfo)> {
        self.infos.iter_mut()
    }

    pub fn paths(&self) -> Vec<CanonicalPath> {
        self.infos.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn shrink_to_fit(&mut self) {
        self.infos.shrink_to_fit();
    }
}
