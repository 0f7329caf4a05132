//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce how production code
//! in the bridge crates is written:
//! - No sleep() calls; streams wait on I/O with timeouts
//! - No blocking I/O inside async functions
//! - No unwrap()/expect() outside test modules
//!
//! The helpers here locate the workspace sources and split each file into
//! its production part and its test module.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["bridge/core/src", "bridge/cli/src"];

/// Absolute path of the workspace root
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// One Rust source file with its lines
pub struct SourceFile {
    /// Path of the file
    pub path: PathBuf,
    /// File content split into lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Lines before the first `#[cfg(test)]` attribute
    #[must_use]
    pub fn production_lines(&self) -> &[String] {
        let end = self
            .lines
            .iter()
            .position(|line| line.trim().starts_with("#[cfg(test)]"))
            .unwrap_or(self.lines.len());
        &self.lines[..end]
    }
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
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
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                lines: content.lines().map(str::to_string).collect(),
            });
        }
    }

    files
}

/// The code part of a line, without a trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let file = SourceFile {
            path: PathBuf::from("x.rs"),
            lines: vec![
                "fn a() {}".to_string(),
                "#[cfg(test)]".to_string(),
                "mod tests {}".to_string(),
            ],
        };

        assert_eq!(file.production_lines().len(), 1);
    }

    #[test]
    fn test_production_sources_found() {
        assert!(
            !production_sources().is_empty(),
            "expected to find bridge sources under {}",
            workspace_root().display()
        );
    }

    #[test]
    fn test_code_part_drops_comment() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
    }
}
