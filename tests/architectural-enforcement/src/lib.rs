//! Architectural Enforcement Integration Tests
//!
//! Source-scanning checks that keep production code honest:
//! - No sleep() calls (threads wait on channels and condition variables)
//! - No unwrap()/expect() outside tests
//! - Locks come from parking_lot, never std::sync
//!
//! The helpers here walk the workspace sources and hand back the production
//! part of each file; the policies live in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/cli/src"];

/// A policy violation at a specific line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Root of the cargo workspace
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files
}

/// Lines of `content` that are production code, comments stripped
///
/// Everything from the first `#[cfg(test)]` onward is treated as test code.
/// Returns `(line_number, code_part)` pairs.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Scan every production file with `is_violation`
#[must_use]
pub fn scan(is_violation: impl Fn(&str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();

    for path in production_files() {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => continue,
        };
        for (line, code) in production_lines(&content) {
            if is_violation(code) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }

    violations
}

/// Print violations and fail the test if there are any
pub fn report(title: &str, advice: &[&str], violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in advice {
        eprintln!("  {line}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn real() {}\n\n#[cfg(test)]\nmod tests {\n    fn fake() {}\n}\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn real() {}")]);
    }

    #[test]
    fn test_production_lines_strip_comments() {
        let source = "let x = y; // x.unwrap()\n//! docs .unwrap()\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "let x = y; ")]);
    }

    #[test]
    fn test_workspace_has_production_sources() {
        let files = production_files();
        assert!(
            files.iter().any(|p| p.ends_with("relay/core/src/lib.rs")),
            "expected to find relay-core sources, got {files:?}"
        );
    }
}
