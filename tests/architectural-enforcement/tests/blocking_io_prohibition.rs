//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async production code MUST NOT use blocking I/O.
//! **Required**: Use `tokio::net`, `tokio::io` and async `reqwest`, not
//! `std::net` or `reqwest::blocking`
//!
//! Plain functions may read files (config and transcript loading happen
//! before any stream is opened).

use architectural_enforcement::{code_part, production_sources};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs inside async functions");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config and transcript loading)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.production_lines();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            let location = format!("{}:{}", file.path.display(), idx + 1);

            if code.contains("std::fs::") && is_in_async_function(lines, idx) {
                violations.push(format!("{location} - Blocking file I/O: {}", line.trim()));
            }

            if code.contains("std::net::") || code.contains("use std::net") {
                violations.push(format!("{location} - Blocking network I/O: {}", line.trim()));
            }

            if code.contains("reqwest::blocking") {
                violations.push(format!("{location} - Blocking HTTP client: {}", line.trim()));
            }

            if code.contains("std::io::stdin()") && is_in_async_function(lines, idx) {
                violations.push(format!("{location} - Blocking stdin in async: {}", line.trim()));
            }
        }
    }

    violations
}

/// Whether the nearest enclosing function header above `current_idx` is async
fn is_in_async_function(lines: &[String], current_idx: usize) -> bool {
    for line in lines[..current_idx].iter().rev() {
        let line = line.trim();

        if line.contains("async fn ") {
            return true;
        }

        if is_fn_header(line) {
            return false;
        }

        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return false;
        }
    }
    false
}

fn is_fn_header(line: &str) -> bool {
    let line = line
        .strip_prefix("pub(crate) ")
        .or_else(|| line.strip_prefix("pub "))
        .unwrap_or(line);
    line.starts_with("fn ")
}

#[test]
fn test_async_function_detection() {
    let code: Vec<String> = [
        "async fn bad_function() {",
        "    let contents = std::fs::read_to_string(\"file.txt\")?;",
        "}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    assert!(is_in_async_function(&code, 1));
}

#[test]
fn test_non_async_function_detection() {
    let code: Vec<String> = [
        "pub fn load_config_from_path(path: &Path) -> Result<Config> {",
        "    let contents = std::fs::read_to_string(path)?;",
        "}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    assert!(!is_in_async_function(&code, 1));
}
