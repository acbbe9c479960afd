//
// project/references.rs
//
// Static scan of a source file for the files it references
//

use regex::Regex;
use std::sync::OnceLock;

use crate::text::TextSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// `import`/`export ... from`, `require()`, `import()`.
    Module,
    /// `/// <reference path="..." />`
    Path,
    /// `/// <reference types="..." />`
    Types,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub specifier: String,
    pub kind: ReferenceKind,
    /// Span of the specifier text, in chars, without quotes.
    pub span: TextSpan,
}

struct ReferencePatterns {
    import_export: Regex,
    require: Regex,
    dynamic_import: Regex,
    reference_path: Regex,
    reference_types: Regex,
}

fn patterns() -> &'static ReferencePatterns {
    static PATTERNS: OnceLock<ReferencePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ReferencePatterns {
        import_export: Regex::new(
            r#"\b(?:import|export)\s+(?:type\s+)?(?:[\w*{}\s,$]+?\s+from\s+)?["']([^"'\n]+)["']"#,
        )
        .unwrap(),
        require: Regex::new(r#"\brequire\s*\(\s*["']([^"'\n]+)["']\s*\)"#).unwrap(),
        dynamic_import: Regex::new(r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*\)"#).unwrap(),
        reference_path: Regex::new(r#"(?m)^\s*///\s*<reference\s+path\s*=\s*["']([^"'\n]+)["']"#)
            .unwrap(),
        reference_types: Regex::new(
            r#"(?m)^\s*///\s*<reference\s+types\s*=\s*["']([^"'\n]+)["']"#,
        )
        .unwrap(),
    })
}

/// Find every file reference in `text`, in source order. Duplicate
/// specifiers of the same kind are reported once.
pub fn scan_references(text: &str) -> Vec<FileReference> {
    let p = patterns();
    let mut found: Vec<(usize, usize, ReferenceKind)> = Vec::new();
    let sources = [
        (&p.import_export, ReferenceKind::Module),
        (&p.require, ReferenceKind::Module),
        (&p.dynamic_import, ReferenceKind::Module),
        (&p.reference_path, ReferenceKind::Path),
        (&p.reference_types, ReferenceKind::Types),
    ];
    for (regex, kind) in sources {
        for caps in regex.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.end(), kind));
            }
        }
    }
    found.sort_by_key(|(start, _, _)| *start);

    // Byte offsets to char offsets in one forward pass.
    let mut references: Vec<FileReference> = Vec::new();
    let mut byte = 0;
    let mut chars = 0;
    for (start, end, kind) in found {
        chars += text[byte..start].chars().count();
        byte = start;
        let specifier = &text[start..end];
        let length = specifier.chars().count();
        if references
            .iter()
            .any(|r| r.kind == kind && r.specifier == specifier)
        {
            continue;
        }
        references.push(FileReference {
            specifier: specifier.to_string(),
            kind,
            span: TextSpan::new(chars, length),
        });
    }
    references
}
