//! Architectural Enforcement for the Planning Gateway
//!
//! Integration tests in this package scan the gateway sources and fail on
//! patterns that do not belong in production code:
//! - Blocking I/O inside async functions
//! - `sleep()` outside the mock tier's simulated latency
//! - `unwrap()` / `expect()` outside tests
//!
//! This library holds the shared source scanner.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["gateway/core/src", "gateway/daemon/src"];

/// Workspace root, resolved from this package's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// A Rust source file split into scannable lines
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    lines: Vec<String>,
}

/// One line of production code
pub struct CodeLine<'a> {
    /// 1-based line number
    pub number: usize,
    /// Full line as written
    pub text: &'a str,
    /// Line with any trailing `//` comment removed
    pub code: &'a str,
}

impl SourceFile {
    pub fn from_source(path: impl Into<PathBuf>, source: &str) -> Self {
        Self {
            path: path.into(),
            lines: source.lines().map(String::from).collect(),
        }
    }

    /// Lines before the first `#[cfg(test)]`, without comment-only lines
    pub fn production_lines(&self) -> impl Iterator<Item = CodeLine<'_>> {
        self.lines
            .iter()
            .enumerate()
            .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
            .filter(|(_, line)| {
                let trimmed = line.trim_start();
                !(trimmed.starts_with("//") || trimmed.starts_with("*"))
            })
            .map(|(idx, line)| CodeLine {
                number: idx + 1,
                text: line.as_str(),
                code: line.split("//").next().unwrap_or(line),
            })
    }

    /// Whether the function enclosing `line_number` is declared `async`
    pub fn in_async_fn(&self, line_number: usize) -> bool {
        self.lines[..line_number.min(self.lines.len())]
            .iter()
            .rev()
            .find(|line| {
                let line = line.trim_start();
                !line.starts_with("//") && line.contains("fn ") && line.contains('(')
            })
            .is_some_and(|line| line.contains("async fn "))
    }

    /// Whether this file lives at `suffix` (e.g. `backend/mock.rs`)
    pub fn is(&self, suffix: &str) -> bool {
        self.path.ends_with(suffix)
    }
}

/// Load every `.rs` file under the production source trees
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        for entry in walkdir::WalkDir::new(root.join(dir))
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(source) = fs::read_to_string(path) {
                let relative = path.strip_prefix(&root).unwrap_or(path);
                files.push(SourceFile::from_source(relative, &source));
            }
        }
    }
    files
}

/// Format a violation the same way for every check
pub fn violation(file: &SourceFile, line: &CodeLine<'_>, what: &str) -> String {
    format!(
        "{}:{} - {}: {}",
        file.path.display(),
        line.number,
        what,
        line.text.trim()
    )
}

/// Print violations and panic if there are any
pub fn report(title: &str, hint: &[&str], violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in hint {
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

    const SAMPLE: &str = r#"
pub fn load() -> String {
    std::fs::read_to_string("a").unwrap() // comment .expect(
}

pub async fn serve() {
    // std::fs::write in a comment
    let x = 1;
}

#[cfg(test)]
mod tests {
    fn helper() { value.unwrap(); }
}
"#;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let file = SourceFile::from_source("sample.rs", SAMPLE);
        let lines: Vec<_> = file.production_lines().collect();

        assert!(lines.iter().all(|l| !l.text.contains("helper")));
        assert!(lines.iter().all(|l| !l.text.contains("in a comment")));
        let read = lines.iter().find(|l| l.code.contains("read_to_string")).unwrap();
        assert!(!read.code.contains("comment"));
    }

    #[test]
    fn test_async_detection() {
        let file = SourceFile::from_source("sample.rs", SAMPLE);
        // Line 3 is inside `load`, line 8 inside `serve`
        assert!(!file.in_async_fn(3));
        assert!(file.in_async_fn(8));
    }

    #[test]
    fn test_workspace_root_contains_gateway() {
        assert!(workspace_root().join("gateway/core/src/lib.rs").exists());
    }
}
