//! Deterministic fixture workspace generator for benchmarks and tests.
//!
//! Generates synthetic TypeScript workspaces with controlled characteristics:
//! file count, import chains, exported functions per file and a
//! `tsconfig.json` at the root.
//!
//! All output is deterministic so benchmarks are reproducible.

use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

use super::MemoryHost;

/// Configuration for generating a fixture workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub functions_per_file: usize,
    /// Files `0..import_chain_depth` each import their successor.
    pub import_chain_depth: usize,
    pub extra_lines_per_file: usize,
}

impl FixtureConfig {
    /// Small workspace: 10 files, 5 functions each, import chain depth 3.
    pub fn small() -> Self {
        Self {
            file_count: 10,
            functions_per_file: 5,
            import_chain_depth: 3,
            extra_lines_per_file: 5,
        }
    }

    /// Medium workspace: 50 files, 10 functions each, import chain depth 10.
    pub fn medium() -> Self {
        Self {
            file_count: 50,
            functions_per_file: 10,
            import_chain_depth: 10,
            extra_lines_per_file: 10,
        }
    }
}

/// Relative name of fixture file `index`.
pub fn fixture_file_name(index: usize) -> String {
    format!("src/file_{}.ts", index)
}

/// Generate the content of a single TypeScript file deterministically.
pub fn generate_ts_file_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();

    if index < config.import_chain_depth && index + 1 < config.file_count {
        writeln!(content, "import {{ func_{}_0 }} from \"./file_{}\";", index + 1, index + 1).unwrap();
        content.push('\n');
    }

    for func_i in 0..config.functions_per_file {
        writeln!(
            content,
            "export function func_{}_{}(x: number, y = {}): number {{",
            index,
            func_i,
            func_i + 1
        )
        .unwrap();
        writeln!(content, "    const result = x + y * {};", func_i + 1).unwrap();
        writeln!(content, "    return result;").unwrap();
        writeln!(content, "}}").unwrap();
        content.push('\n');
    }

    for line_i in 0..config.extra_lines_per_file {
        writeln!(content, "export const var_{}_{} = {};", index, line_i, line_i + 1).unwrap();
    }

    content
}

const TSCONFIG: &str = r#"{
    "compilerOptions": { "strict": true },
    "include": ["src"]
}
"#;

/// Create a temporary fixture workspace from the given configuration.
///
/// The directory is cleaned up when the `TempDir` is dropped.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    std::fs::create_dir_all(dir.join("src")).expect("Failed to create src directory");
    std::fs::write(dir.join("tsconfig.json"), TSCONFIG).expect("Failed to write tsconfig.json");
    for i in 0..config.file_count {
        let filename = fixture_file_name(i);
        std::fs::write(dir.join(&filename), generate_ts_file_content(i, config))
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filename, e));
    }
}

/// Populate a [`MemoryHost`] with the same files under `root`.
pub fn write_fixture_to_memory_host(host: &MemoryHost, root: &str, config: &FixtureConfig) {
    host.add_file(&format!("{}/tsconfig.json", root), TSCONFIG);
    for i in 0..config.file_count {
        host.add_file(
            &format!("{}/{}", root, fixture_file_name(i)),
            &generate_ts_file_content(i, config),
        );
    }
}
