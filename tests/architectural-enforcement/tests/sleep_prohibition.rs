//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the bridge crates MUST NOT call sleep.
//! Streams wait on I/O bounded by `tokio::time::timeout`; credential
//! refresh is driven by callers, never by a timer.
//! **Exceptions**: test code

use architectural_enforcement::{code_part, production_sources};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE:");
        eprintln!("  - tokio::time::timeout around a read");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.production_lines().iter().enumerate() {
            if is_sleep_call(code_part(line)) {
                violations.push(format!(
                    "{}:{} - {}",
                    file.path.display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }

    violations
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(")
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call(
        "    tokio::time::sleep(Duration::from_millis(10)).await;"
    ));
    assert!(is_sleep_call("std::thread::sleep(delay);"));
    assert!(!is_sleep_call(
        "tokio::time::timeout(idle, stream.next()).await"
    ));
}
