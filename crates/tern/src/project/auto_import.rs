//
// project/auto_import.rs
//
// Root selection for auto-import provider projects
//

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use super::references::{FileReference, ReferenceKind};
use super::resolution::resolve_reference;
use crate::config_file::CompilerOptions;
use crate::host::ServerHost;
use crate::path::{CanonicalPath, NormalizedPath};
use crate::text::TextSpan;

/// Upper bound on dependencies whose typings are pulled in.
pub const MAX_AUTO_IMPORT_DEPENDENCIES: usize = 10;

const DEPENDENCY_FIELDS: &[&str] = &["dependencies", "peerDependencies", "optionalDependencies"];

/// Dependency names declared by `package.json` files from `directory` up to
/// the root, nearest first.
fn declared_dependencies(host: &dyn ServerHost, directory: &NormalizedPath) -> IndexSet<String> {
    let mut names = IndexSet::new();
    for dir in std::iter::once(directory.clone()).chain(directory.ancestors()) {
        let package_json = dir.join("package.json");
        if !host.file_exists(&package_json) {
            continue;
        }
        let json = match host.read_file(&package_json).map(|text| serde_json::from_str::<Value>(&text)) {
            Ok(Ok(json)) => json,
            Ok(Err(e)) => {
                log::trace!("Ignoring malformed {}: {}", package_json, e);
                continue;
            }
            Err(e) => {
                log::trace!("Could not read {}: {}", package_json, e);
                continue;
            }
        };
        for field in DEPENDENCY_FIELDS {
            if let Some(object) = json.get(field).and_then(Value::as_object) {
                names.extend(object.keys().cloned());
            }
        }
    }
    names
}

/// Typings entry points of the dependencies visible from `directory`,
/// skipping files the host program already contains.
pub fn auto_import_root_files(
    host: &dyn ServerHost,
    directory: &NormalizedPath,
    host_program: &IndexMap<CanonicalPath, NormalizedPath>,
    case_sensitive: bool,
) -> Vec<NormalizedPath> {
    let options = CompilerOptions::background_defaults();
    let mut roots: IndexMap<CanonicalPath, NormalizedPath> = IndexMap::new();
    let mut resolved_dependencies = 0;

    for name in declared_dependencies(host, directory) {
        if resolved_dependencies >= MAX_AUTO_IMPORT_DEPENDENCIES {
            log::trace!(
                "Auto-import provider for {} stopped at {} dependencies",
                directory,
                MAX_AUTO_IMPORT_DEPENDENCIES
            );
            break;
        }
        let reference = FileReference {
            specifier: name,
            kind: ReferenceKind::Module,
            span: TextSpan::default(),
        };
        let Some(entry) = resolve_reference(host, directory, &reference, &options).resolved else {
            continue;
        };
        resolved_dependencies += 1;
        let key = entry.to_canonical(case_sensitive);
        if host_program.contains_key(&key) {
            continue;
        }
        roots.entry(key).or_insert(entry);
    }
    roots.into_values().collect()
}
