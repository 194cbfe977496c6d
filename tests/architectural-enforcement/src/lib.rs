//! Architectural Enforcement Integration Tests
//!
//! This package contains tests that enforce architectural principles across
//! the conductor crates:
//! - No blocking sleeps in production code
//! - No `unwrap()`/`expect()` in production code; errors are propagated
//!
//! Test modules (`#[cfg(test)]` and everything after it) and integration
//! test directories are exempt.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A rule a production source line must not break
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rule {
    /// Short rule name used in reports
    pub name: &'static str,
    /// Forbidden substring
    pub needle: &'static str,
}

/// Rules enforced on every production source line
pub const RULES: &[Rule] = &[
    Rule {
        name: "blocking-sleep",
        needle: "thread::sleep(",
    },
    Rule {
        name: "unwrap",
        needle: ".unwrap()",
    },
    Rule {
        name: "expect",
        needle: ".expect(",
    },
];

/// One rule violation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule that was broken
    pub rule: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.rule)
    }
}

/// Check one file's source text
///
/// Scanning stops at the first `#[cfg(test)]`; comment lines are skipped.
#[must_use]
pub fn check_source(path: &Path, source: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        for rule in RULES {
            if line.contains(rule.needle) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line: index + 1,
                    rule: rule.name,
                });
            }
        }
    }
    violations
}

/// Check every production `.rs` file under `root`
///
/// Directories named `tests`, `benches` or `target` are skipped.
#[must_use]
pub fn check_tree(root: &Path) -> Vec<Violation> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && matches!(name.as_ref(), "tests" | "benches" | "target"))
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rs"))
        .flat_map(|entry| match fs::read_to_string(entry.path()) {
            Ok(source) => check_source(entry.path(), &source),
            Err(_) => Vec::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conductor_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../conductor")
    }

    #[test]
    fn test_conductor_sources_exist() {
        let root = conductor_root();
        let files = WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .count();
        assert!(files > 10, "expected conductor sources under {}", root.display());
    }

    #[test]
    fn test_no_violations_in_production_code() {
        let violations = check_tree(&conductor_root());
        let report: Vec<String> = violations.iter().map(ToString::to_string).collect();
        assert!(
            violations.is_empty(),
            "Architectural violations:\n{}",
            report.join("\n")
        );
    }

    #[test]
    fn test_detects_violations() {
        let source = "fn f() {\n    std::thread::sleep(d);\n    let x = y.unwrap();\n    // z.unwrap() in a comment\n    let w = v.unwrap_or_default();\n}\n";
        let violations = check_source(Path::new("f.rs"), source);
        let rules: Vec<_> = violations.iter().map(|v| (v.line, v.rule)).collect();
        assert_eq!(rules, vec![(2, "blocking-sleep"), (3, "unwrap")]);
    }

    #[test]
    fn test_test_modules_are_exempt() {
        let source = "fn f() {}\n#[cfg(test)]\nmod tests {\n    fn t() { x.unwrap(); }\n}\n";
        assert!(check_source(Path::new("f.rs"), source).is_empty());
    }
}
