//
// path.rs
//
// Normalized file names and canonical registry keys
//

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// A slash-separated, rooted file name with `.` and `..` segments resolved.
///
/// This is the display form of a file: it keeps the casing the client used.
/// Dynamic file names (`^/untitled/...`, `untitled:^Untitled-1`) are kept
/// verbatim because they do not live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NormalizedPath(String);

/// Case-folded form of a [`NormalizedPath`], used as the identity key of
/// script infos, configured projects and config-file cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalPath(String);

impl NormalizedPath {
    /// Normalize `file_name`, resolving it against `current_directory` when it
    /// is relative.
    pub fn new(file_name: &str, current_directory: &str) -> Self {
        if is_dynamic_file_name(file_name) {
            return Self(file_name.to_string());
        }
        let slashed = file_name.replace('\\', "/");
        if is_rooted(&slashed) {
            Self(normalize_slashes(&slashed))
        } else {
            let base = current_directory.replace('\\', "/");
            Self(normalize_slashes(&format!("{}/{}", base, slashed)))
        }
    }

    /// Wrap an already absolute path.
    pub fn from_absolute(path: &str) -> Self {
        Self::new(path, "/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Canonical key for this path.
    pub fn to_canonical(&self, case_sensitive: bool) -> CanonicalPath {
        if case_sensitive {
            CanonicalPath(self.0.clone())
        } else {
            CanonicalPath(self.0.to_lowercase())
        }
    }

    /// The containing directory, or `None` at the root.
    pub fn parent(&self) -> Option<NormalizedPath> {
        parent_of(&self.0).map(|p| Self(p.to_string()))
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        file_name_of(&self.0)
    }

    /// Resolve `relative` against this path treated as a directory.
    pub fn join(&self, relative: &str) -> NormalizedPath {
        Self::new(relative, &self.0)
    }

    /// True when `self` is `dir` or lives somewhere below it.
    pub fn is_within(&self, dir: &NormalizedPath) -> bool {
        is_within(&self.0, &dir.0)
    }

    /// Directories from this path's parent up to the root.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Path of `self` relative to `dir`, if `self` is within it.
    pub fn relative_to(&self, dir: &NormalizedPath) -> Option<&str> {
        if !self.is_within(dir) {
            return None;
        }
        let rest = &self.0[dir.0.len()..];
        Some(rest.trim_start_matches('/'))
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        self.0.len() > extension.len()
            && self.0[self.0.len() - extension.len()..].eq_ignore_ascii_case(extension)
    }

    /// True when any directory segment is `node_modules`.
    pub fn is_in_node_modules(&self) -> bool {
        self.0.split('/').any(|segment| segment == "node_modules")
    }

    pub fn is_dynamic(&self) -> bool {
        is_dynamic_file_name(&self.0)
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl CanonicalPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical form of the containing directory.
    pub fn parent(&self) -> Option<CanonicalPath> {
        parent_of(&self.0).map(|p| Self(p.to_string()))
    }

    pub fn is_within(&self, dir: &CanonicalPath) -> bool {
        is_within(&self.0, &dir.0)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Iterator over the ancestor directories of a path.
pub struct Ancestors {
    next: Option<NormalizedPath>,
}

impl Iterator for Ancestors {
    type Item = NormalizedPath;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

/// Names the client invents for buffers that have no file on disk.
pub fn is_dynamic_file_name(file_name: &str) -> bool {
    if file_name.starts_with('^') {
        return true;
    }
    let base = file_name_of(file_name);
    if (file_name.contains("walkThroughSnippet:/") || file_name.contains("untitled:/"))
        && base.starts_with('^')
    {
        return true;
    }
    file_name.contains(":^") && !file_name.contains('/')
}

fn is_rooted(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Length of the root prefix: `/` or `c:/`.
fn root_length(path: &str) -> usize {
    if path.starts_with('/') {
        return 1;
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        if bytes.len() >= 3 && bytes[2] == b'/' {
            return 3;
        }
        return 2;
    }
    0
}

fn normalize_slashes(path: &str) -> String {
    let root_len = root_length(path);
    let root = &path[..root_len];
    let mut segments: Vec<&str> = Vec::new();
    for segment in path[root_len..].split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut root = root.to_string();
    if !root.ends_with('/') {
        root.push('/');
    }
    format!("{}{}", root, segments.join("/"))
}

fn parent_of(path: &str) -> Option<&str> {
    let root_len = root_length(path);
    if path.len() <= root_len + usize::from(root_len == 2) {
        return None;
    }
    match path.rfind('/') {
        Some(idx) if idx < root_len => Some(&path[..root_len.max(idx + 1)]),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn file_name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

fn is_within(path: &str, dir: &str) -> bool {
    if path == dir {
        return true;
    }
    if !path.starts_with(dir) {
        return false;
    }
    dir.ends_with('/') || path.as_bytes().get(dir.len()) == Some(&b'/')
}
