//! Integration Test: Panic-Free Production Code
//!
//! **Policy**: Production code in the bridge crates propagates errors with
//! `?` and typed errors. `unwrap()` and `expect()` belong in tests only.

use architectural_enforcement::{code_part, production_sources};

#[test]
fn test_no_unwrap_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.production_lines().iter().enumerate() {
            if is_panicking_unwrap(code_part(line)) {
                violations.push(format!(
                    "{}:{} - {}",
                    file.path.display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }
        panic!(
            "\nFound {} unwrap()/expect() call(s) in production code.",
            violations.len()
        );
    }
}

fn is_panicking_unwrap(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

#[test]
fn test_unwrap_detection() {
    assert!(is_panicking_unwrap("let x = value.unwrap();"));
    assert!(is_panicking_unwrap("let x = value.expect(\"set\");"));
    assert!(!is_panicking_unwrap("let x = value.unwrap_or_default();"));
    assert!(!is_panicking_unwrap("let x = value.unwrap_or_else(|| 1);"));
}
