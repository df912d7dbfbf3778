//! Integration Test: Panic-Free Production Code
//!
//! **Policy**: production code propagates errors with `?` or maps them into
//! `GatewayError`/`anyhow`. `unwrap()` and `expect()` are for tests only.

use architectural_enforcement::{production_sources, report, violation};

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for line in file.production_lines() {
            if line.code.contains(".unwrap()") {
                violations.push(violation(&file, &line, "unwrap()"));
            }
            if line.code.contains(".expect(") {
                violations.push(violation(&file, &line, "expect()"));
            }
        }
    }

    report(
        "CRITICAL: unwrap()/expect() found in production code!",
        &[
            "✅ Propagate with `?` and a typed error.",
            "✅ Use unwrap_or / unwrap_or_else / ok_or_else for defaults.",
        ],
        &violations,
    );
}

#[test]
fn test_scanner_sees_both_crates() {
    let files = production_sources();
    assert!(files.iter().any(|f| f.is("gateway/core/src/lib.rs")));
    assert!(files.iter().any(|f| f.is("gateway/daemon/src/main.rs")));
}
