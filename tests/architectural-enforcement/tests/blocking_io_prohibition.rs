//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in the gateway MUST NOT use blocking I/O. Request
//! handling, dispatch and feedback persistence all run on the tokio runtime.
//! **Required**: `tokio::fs`, `tokio::net`, `reqwest` (async client).
//!
//! Synchronous functions are exempt: configuration is loaded before the
//! runtime serves traffic. Reloads happen while serving, so an async
//! function may only reach a sync `reload_*` helper through
//! `spawn_blocking`.

use architectural_enforcement::{production_sources, report, violation, SourceFile};

const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::thread::sleep", "Thread sleep"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for line in file.production_lines() {
            for (pattern, what) in BLOCKING_PATTERNS {
                if line.code.contains(pattern) && file.in_async_fn(line.number) {
                    violations.push(violation(&file, &line, what));
                }
            }
        }
    }

    report(
        "CRITICAL: Blocking I/O found in async production code!",
        &[
            "✅ Use tokio::fs, tokio::net and the async reqwest client.",
            "✅ Blocking calls are fine in sync functions that run before serving.",
        ],
        &violations,
    );
}

#[test]
fn test_no_blocking_reqwest_anywhere() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for line in file.production_lines() {
            if line.code.contains("reqwest::blocking") {
                violations.push(violation(&file, &line, "Blocking HTTP client"));
            }
        }
    }

    report(
        "CRITICAL: reqwest::blocking used in production code!",
        &["✅ Tier calls must go through the async client with a deadline."],
        &violations,
    );
}

/// Lines in async functions that call a `reload_*` helper off the blocking pool
fn unpooled_reloads(file: &SourceFile) -> Vec<usize> {
    file.production_lines()
        .filter(|line| {
            let code = line.code.trim_start();
            !code.contains("fn reload_")
                && code.contains("reload_")
                && code.contains('(')
                && !code.contains("spawn_blocking")
                && file.in_async_fn(line.number)
        })
        .map(|line| line.number)
        .collect()
}

#[test]
fn test_reload_helpers_run_on_blocking_pool() {
    let mut violations = Vec::new();

    for file in production_sources() {
        let flagged = unpooled_reloads(&file);
        for line in file.production_lines() {
            if flagged.contains(&line.number) {
                violations.push(violation(&file, &line, "Sync reload on the async runtime"));
            }
        }
    }

    report(
        "CRITICAL: Config reload runs blocking I/O on a runtime worker!",
        &["✅ Wrap the call: tokio::task::spawn_blocking(move || reload_...(..))."],
        &violations,
    );
}

#[test]
fn test_direct_reload_from_async_fn_is_flagged() {
    let source = r#"
fn reload_tiers(path: &str) -> u64 {
    std::fs::read_to_string(path).map(|s| s.len() as u64).unwrap_or(0)
}

async fn on_hangup() {
    let version = reload_tiers("gateway.toml");
}

async fn on_hangup_pooled() {
    let version = tokio::task::spawn_blocking(move || reload_tiers("gateway.toml")).await;
}
"#;
    let file = SourceFile::from_source("sample.rs", source);
    assert_eq!(unpooled_reloads(&file), vec![7]);
}
