//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code MUST NOT sleep. Deadlines are enforced with
//! `tokio::time::timeout`, waiting callers park on a watch channel, and the
//! cache sweeper ticks on `tokio::time::interval`.
//! **Exception**: the mock tier's simulated latency (`backend/mock.rs`).

use architectural_enforcement::{production_sources, report, violation};

const ALLOWED: &[&str] = &["backend/mock.rs"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        if ALLOWED.iter().any(|suffix| file.is(suffix)) {
            continue;
        }
        for line in file.production_lines() {
            if line.code.contains("::sleep(") || line.code.contains(".sleep(") {
                violations.push(violation(&file, &line, "sleep"));
            }
        }
    }

    report(
        "CRITICAL: Sleep calls found in production code!",
        &[
            "✅ Bound work with tokio::time::timeout.",
            "✅ Wait on channels or Notify instead of polling.",
            "✅ Periodic work uses tokio::time::interval.",
        ],
        &violations,
    );
}
