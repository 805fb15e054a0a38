//! Lightweight text extractors run over chunk pairs by the edge builder's
//! pass one.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Chunk, Confidence};

const FILE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "c", "cpp", "h", "hpp", "cs",
    "php", "toml", "yaml", "yml", "json", "md", "sh", "sql", "html", "css", "proto", "kt",
    "swift", "scala",
];

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?x)
            [A-Za-z0-9_./-]+
            \.
            [A-Za-z0-9]+
        ").expect("static regex is valid")
    })
}

fn identifier_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:fn|function|def|class|struct|enum|trait|interface|const|export\s+(?:default\s+)?(?:function|class|const))\s+([A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("static regex is valid")
    })
}

fn identifier_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]{2,}\b").expect("static regex is valid"))
}

/// Extracts file-like tokens (a path fragment ending in a known
/// extension) from `text`.
#[must_use]
pub fn extract_file_paths(text: &str) -> HashSet<String> {
    file_path_re()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|candidate| {
            candidate
                .rsplit('.')
                .next()
                .is_some_and(|ext| FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect()
}

/// Extracts identifiers declared via a `fn`/`class`/`struct`/`export`-like
/// keyword.
#[must_use]
pub fn extract_declared_identifiers(text: &str) -> HashSet<String> {
    identifier_decl_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Whether `identifier` is referenced verbatim as a standalone token in
/// `text`.
#[must_use]
pub fn references_identifier(text: &str, identifier: &str) -> bool {
    identifier_ref_re()
        .find_iter(text)
        .any(|m| m.as_str() == identifier)
}

/// Extracts 20-50 character windows of `text` that look like an error
/// message (contain `error`, `exception`, `panic`, `fail`, or a stack
/// trace marker), used for `error-fragment` matching.
#[must_use]
pub fn extract_error_fragments(text: &str) -> Vec<String> {
    const MARKERS: &[&str] = &["error", "exception", "panic", "failed", "traceback"];
    let lowered = text.to_lowercase();
    let mut fragments = Vec::new();
    for line in text.lines() {
        let lower_line = line.to_lowercase();
        if !MARKERS.iter().any(|m| lower_line.contains(m)) {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.len() >= 20 {
            let end = trimmed.len().min(50);
            let mut boundary = end;
            while boundary > 0 && !trimmed.is_char_boundary(boundary) {
                boundary -= 1;
            }
            fragments.push(trimmed[..boundary].to_string());
        }
    }
    if fragments.is_empty() && lowered.len() >= 20 {
        // Fall back to scanning fixed-size windows around any marker
        // occurrence, in case the marker sits mid-line without newlines.
        for marker in MARKERS {
            if let Some(pos) = lowered.find(marker) {
                let start = pos.saturating_sub(10);
                let mut start_boundary = start;
                while start_boundary > 0 && !text.is_char_boundary(start_boundary) {
                    start_boundary -= 1;
                }
                let end = (start_boundary + 50).min(text.len());
                let mut end_boundary = end;
                while end_boundary > start_boundary && !text.is_char_boundary(end_boundary) {
                    end_boundary -= 1;
                }
                if end_boundary - start_boundary >= 20 {
                    fragments.push(text[start_boundary..end_boundary].to_string());
                }
            }
        }
    }
    fragments
}

/// Extracts lines of at least 20 characters from a chunk's tool-result
/// blocks, candidates for a `tool-output` transition.
#[must_use]
pub fn extract_tool_output_lines(chunk: &Chunk) -> HashSet<String> {
    chunk
        .content
        .lines()
        .filter(|l| l.trim().len() >= 20)
        .map(|l| l.trim().to_string())
        .collect()
}

/// Assigns a confidence level to a matched category based on how
/// distinctive the evidence is: longer/more specific matches are high
/// confidence, short generic ones are low.
#[must_use]
pub fn confidence_for_match_len(len: usize) -> Confidence {
    if len >= 30 {
        Confidence::High
    } else if len >= 15 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_file_paths_with_known_extensions() {
        let paths = extract_file_paths("see src/a.ts and docs/readme.md and random.xyz");
        assert!(paths.contains("src/a.ts"));
        assert!(paths.contains("docs/readme.md"));
        assert!(!paths.iter().any(|p| p.ends_with(".xyz")));
    }

    #[test]
    fn extracts_declared_identifiers() {
        let ids = extract_declared_identifiers("fn parse_session(x: &str) {}");
        assert!(ids.contains("parse_session"));
    }

    #[test]
    fn detects_verbatim_identifier_reference() {
        assert!(references_identifier("call parse_session(data)", "parse_session"));
        assert!(!references_identifier("unrelated text", "parse_session"));
    }

    #[test]
    fn extracts_error_fragments_over_length_threshold() {
        let text = "Running tests...\nError: connection refused at socket bind\nDone.";
        let fragments = extract_error_fragments(text);
        assert!(!fragments.is_empty());
        assert!(fragments[0].len() >= 20);
    }

    #[test]
    fn confidence_scales_with_match_length() {
        assert_eq!(confidence_for_match_len(40), Confidence::High);
        assert_eq!(confidence_for_match_len(20), Confidence::Medium);
        assert_eq!(confidence_for_match_len(5), Confidence::Low);
    }
}
